//! Megadocs: composite artifacts bundling every document matching a search.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::helpers::{parse_rfc3339, to_rfc3339};
use crate::model::record::{storage_ts, HasGuid, HasStatus, RecordMeta, Status};
use crate::model::serialize;

/// Supported megadoc filetypes.
pub const FILETYPES: [&str; 3] = [".txt", ".md", ".docx"];

/// A megadoc is a single file containing the results of every document
/// matching a search. This is the main thing the pipeline is here to
/// produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Megadoc {
    pub meta: RecordMeta,
    pub status: Status,
    pub search_guid: String,
    pub filetype: String,
    pub filename: String,
    /// Relative path under `data_path`, also the object-store key.
    pub path: String,
    pub url: String,
    /// Build progress in percent, monotone non-decreasing.
    pub progress: f64,
}

const COLS: &str = "guid, created_at, updated_at, tags, comment, status, search_guid, filetype, \
                    filename, path, url, progress";

impl Megadoc {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(5)?;
        Ok(Self {
            meta: RecordMeta {
                guid: row.get(0)?,
                created_at: parse_rfc3339(&row.get::<_, String>(1)?),
                updated_at: parse_rfc3339(&row.get::<_, String>(2)?),
                tags: row.get(3)?,
                comment: row.get(4)?,
            },
            status: Status::parse(&status).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    )),
                )
            })?,
            search_guid: row.get(6)?,
            filetype: row.get(7)?,
            filename: row.get(8)?,
            path: row.get(9)?,
            url: row.get(10)?,
            progress: row.get(11)?,
        })
    }

    /// Persist a new megadoc row, status `PENDING`, progress 0. The unique
    /// index on `(search_guid, filetype)` enforces at most one per pair.
    pub fn create(
        conn: &Connection,
        search_guid: &str,
        filetype: &str,
        filename: String,
        path: String,
        url: String,
    ) -> Result<Self> {
        if !FILETYPES.contains(&filetype) {
            return Err(Error::NotImplemented(filetype.to_string()));
        }
        let megadoc = Self {
            meta: RecordMeta::new(),
            status: Status::Pending,
            search_guid: search_guid.to_string(),
            filetype: filetype.to_string(),
            filename,
            path,
            url,
            progress: 0.0,
        };
        conn.execute(
            &format!("INSERT INTO megadocs ({COLS}) \
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                megadoc.meta.guid,
                storage_ts(&megadoc.meta.created_at),
                storage_ts(&megadoc.meta.updated_at),
                megadoc.meta.tags,
                megadoc.meta.comment,
                megadoc.status.as_str(),
                megadoc.search_guid,
                megadoc.filetype,
                megadoc.filename,
                megadoc.path,
                megadoc.url,
                megadoc.progress,
            ],
        )?;
        Ok(megadoc)
    }

    pub fn get(conn: &Connection, guid: &str) -> Result<Option<Self>> {
        let result = conn
            .query_row(
                &format!("SELECT {COLS} FROM megadocs WHERE guid = ?1"),
                params![guid],
                Self::from_row,
            )
            .optional()?;
        if result.is_none() {
            debug!("no megadoc with guid {guid}");
        }
        Ok(result)
    }

    pub fn get_by_search_and_type(
        conn: &Connection,
        search_guid: &str,
        filetype: &str,
    ) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLS} FROM megadocs \
                          WHERE search_guid = ?1 AND filetype = ?2"),
                params![search_guid, filetype],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn for_search(conn: &Connection, search_guid: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM megadocs WHERE search_guid = ?1 ORDER BY created_at, rowid"
        ))?;
        let megadocs = stmt
            .query_map(params![search_guid], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(megadocs)
    }

    pub fn get_total(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM megadocs", [], |row| row.get(0))?)
    }

    /// Advance the lifecycle `PENDING → STARTED → SENDING → SUCCESS`.
    pub fn set_status(&mut self, conn: &Connection, status: Status) -> Result<()> {
        if !self.status.can_advance_to(status) {
            return Err(Error::IllegalTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        debug!("setting status of megadoc <{}> to {status}", self.meta.guid);
        self.status = status;
        self.meta.touch();
        conn.execute(
            "UPDATE megadocs SET status = ?1, updated_at = ?2 WHERE guid = ?3",
            params![
                self.status.as_str(),
                storage_ts(&self.meta.updated_at),
                self.meta.guid
            ],
        )?;
        Ok(())
    }

    /// Record build progress. Regressions are dropped so the column stays
    /// monotone under concurrent observers.
    pub fn set_progress(&mut self, conn: &Connection, progress: f64) -> Result<()> {
        let progress = progress.clamp(0.0, 100.0);
        if progress < self.progress {
            warn!(
                "ignoring progress regression on megadoc <{}>: {:.1} -> {progress:.1}",
                self.meta.guid, self.progress
            );
            return Ok(());
        }
        self.progress = progress;
        self.meta.touch();
        conn.execute(
            "UPDATE megadocs SET progress = ?1, updated_at = ?2 WHERE guid = ?3",
            params![
                self.progress,
                storage_ts(&self.meta.updated_at),
                self.meta.guid
            ],
        )?;
        Ok(())
    }

    /// Size of the built file in bytes; 0 when it does not exist yet.
    pub fn filesize(&self, data_path: &Path) -> u64 {
        std::fs::metadata(data_path.join(&self.path))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub(crate) fn dict(&self, filesize: u64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("guid".into(), self.meta.guid.clone().into());
        map.insert("created_at".into(), to_rfc3339(&self.meta.created_at).into());
        map.insert("updated_at".into(), to_rfc3339(&self.meta.updated_at).into());
        map.insert("tags".into(), self.meta.tags.clone().into());
        map.insert("comment".into(), self.meta.comment.clone().into());
        map.insert("status".into(), self.status.as_str().into());
        map.insert("filetype".into(), self.filetype.clone().into());
        map.insert("url".into(), self.url.clone().into());
        map.insert("progress".into(), self.progress.into());
        map.insert("filesize".into(), filesize.into());
        map
    }

    /// Serialize for export; local `filename`/`path` stay private.
    pub fn as_dict(&self, data_path: &Path, excl: &HashSet<&str>, to_js: bool) -> Value {
        serialize::finish(self.dict(self.filesize(data_path)), excl, to_js)
    }
}

impl HasGuid for Megadoc {
    fn guid(&self) -> &str {
        &self.meta.guid
    }
}

impl HasStatus for Megadoc {
    fn status(&self) -> Status {
        self.status
    }
}
