//! Scans: immutable records of source image files and their metadata.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::helpers::{epoch, parse_rfc3339, to_rfc3339};
use crate::model::record::{storage_ts, HasGuid, RecordMeta};
use crate::model::serialize;

/// Each document is represented first by an immutable scan of the source
/// image. These never change as the OCR output itself is revised.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub meta: RecordMeta,
    pub stem: String,
    pub album: String,
    pub album_index: i64,
    pub title: String,
    /// Relative path to the image file, e.g. `img/<album>/<stem>.webp`.
    pub path: String,
    pub url: String,
    pub thumb_url: String,
    pub scanned_at: DateTime<Utc>,
    pub media_archive: Option<String>,
    pub media_collection: Option<String>,
    pub media_box: Option<String>,
    pub media_folder: Option<String>,
    pub media_type: Option<String>,
    pub media_created_at: DateTime<Utc>,
}

const COLS: &str = "guid, created_at, updated_at, tags, comment, stem, album, album_index, \
                    title, path, url, thumb_url, scanned_at, media_archive, media_collection, \
                    media_box, media_folder, media_type, media_created_at";

impl Scan {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: RecordMeta {
                guid: row.get(0)?,
                created_at: parse_rfc3339(&row.get::<_, String>(1)?),
                updated_at: parse_rfc3339(&row.get::<_, String>(2)?),
                tags: row.get(3)?,
                comment: row.get(4)?,
            },
            stem: row.get(5)?,
            album: row.get(6)?,
            album_index: row.get(7)?,
            title: row.get(8)?,
            path: row.get(9)?,
            url: row.get(10)?,
            thumb_url: row.get(11)?,
            scanned_at: parse_rfc3339(&row.get::<_, String>(12)?),
            media_archive: row.get(13)?,
            media_collection: row.get(14)?,
            media_box: row.get(15)?,
            media_folder: row.get(16)?,
            media_type: row.get(17)?,
            media_created_at: row
                .get::<_, Option<String>>(18)?
                .map(|s| parse_rfc3339(&s))
                .unwrap_or_else(epoch),
        })
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!("INSERT INTO scans ({COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                      ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"),
            params![
                self.meta.guid,
                storage_ts(&self.meta.created_at),
                storage_ts(&self.meta.updated_at),
                self.meta.tags,
                self.meta.comment,
                self.stem,
                self.album,
                self.album_index,
                self.title,
                self.path,
                self.url,
                self.thumb_url,
                storage_ts(&self.scanned_at),
                self.media_archive,
                self.media_collection,
                self.media_box,
                self.media_folder,
                self.media_type,
                storage_ts(&self.media_created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, guid: &str) -> Result<Option<Self>> {
        let result = conn
            .query_row(
                &format!("SELECT {COLS} FROM scans WHERE guid = ?1"),
                params![guid],
                Self::from_row,
            )
            .optional()?;
        if result.is_none() {
            debug!("no scan with guid {guid}");
        }
        Ok(result)
    }

    /// Look up a scan by its per-album identity.
    pub fn get_by_album_and_stem(
        conn: &Connection,
        album: &str,
        stem: &str,
    ) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLS} FROM scans WHERE album = ?1 AND stem = ?2"),
                params![album, stem],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM scans ORDER BY created_at, rowid"
        ))?;
        let scans = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }

    pub fn get_latest(conn: &Connection) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLS} FROM scans ORDER BY created_at DESC, rowid DESC LIMIT 1"),
                [],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn get_total(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?)
    }

    /// Delete this scan; its documents cascade away with it.
    pub fn delete(conn: &Connection, guid: &str) -> Result<bool> {
        let rows = conn.execute("DELETE FROM scans WHERE guid = ?1", params![guid])?;
        Ok(rows > 0)
    }

    pub(crate) fn dict(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("guid".into(), self.meta.guid.clone().into());
        map.insert("created_at".into(), to_rfc3339(&self.meta.created_at).into());
        map.insert("updated_at".into(), to_rfc3339(&self.meta.updated_at).into());
        map.insert("tags".into(), self.meta.tags.clone().into());
        map.insert("comment".into(), self.meta.comment.clone().into());
        map.insert("stem".into(), self.stem.clone().into());
        map.insert("album".into(), self.album.clone().into());
        map.insert("album_index".into(), self.album_index.into());
        map.insert("title".into(), self.title.clone().into());
        map.insert("path".into(), self.path.clone().into());
        map.insert("url".into(), self.url.clone().into());
        map.insert("thumb_url".into(), self.thumb_url.clone().into());
        map.insert("scanned_at".into(), to_rfc3339(&self.scanned_at).into());
        map.insert(
            "media_archive".into(),
            self.media_archive.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "media_collection".into(),
            self.media_collection.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "media_box".into(),
            self.media_box.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "media_folder".into(),
            self.media_folder.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "media_type".into(),
            self.media_type.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "media_created_at".into(),
            to_rfc3339(&self.media_created_at).into(),
        );
        map
    }

    /// Serialize to a plain JSON map. See [`serialize::finish`] for the
    /// exclusion, checksum, and key-case rules.
    pub fn as_dict(&self, excl: &HashSet<&str>, to_js: bool) -> Value {
        serialize::finish(self.dict(), excl, to_js)
    }
}

impl HasGuid for Scan {
    fn guid(&self) -> &str {
        &self.meta.guid
    }
}
