//! Documents: revisions of OCR output belonging to a scan.

use std::collections::HashSet;
use std::path::Path;

use deunicode::deunicode;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::helpers::{parse_rfc3339, to_rfc3339};
use crate::model::record::{storage_ts, HasGuid, RecordMeta};
use crate::model::scan::Scan;
use crate::model::serialize;

/// A document is a specific revision of OCR output for one scan. Revising
/// the text or re-running the OCR model produces a new document; the scan
/// stays put.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub meta: RecordMeta,
    pub scan_guid: String,
    pub batch_name: String,
    pub json_path: String,
    pub json_url: String,
    pub text_path: String,
    pub text_url: String,
}

const COLS: &str =
    "guid, created_at, updated_at, tags, comment, scan_guid, batch_name, json_path, json_url, \
     text_path, text_url";

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: RecordMeta {
                guid: row.get(0)?,
                created_at: parse_rfc3339(&row.get::<_, String>(1)?),
                updated_at: parse_rfc3339(&row.get::<_, String>(2)?),
                tags: row.get(3)?,
                comment: row.get(4)?,
            },
            scan_guid: row.get(5)?,
            batch_name: row.get(6)?,
            json_path: row.get(7)?,
            json_url: row.get(8)?,
            text_path: row.get(9)?,
            text_url: row.get(10)?,
        })
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!("INSERT INTO documents ({COLS}) \
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                self.meta.guid,
                storage_ts(&self.meta.created_at),
                storage_ts(&self.meta.updated_at),
                self.meta.tags,
                self.meta.comment,
                self.scan_guid,
                self.batch_name,
                self.json_path,
                self.json_url,
                self.text_path,
                self.text_url,
            ],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, guid: &str) -> Result<Option<Self>> {
        let result = conn
            .query_row(
                &format!("SELECT {COLS} FROM documents WHERE guid = ?1"),
                params![guid],
                Self::from_row,
            )
            .optional()?;
        if result.is_none() {
            debug!("no document with guid {guid}");
        }
        Ok(result)
    }

    /// All documents in ascending creation order — the order every corpus,
    /// index, and megadoc walks them in.
    pub fn get_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM documents ORDER BY created_at, rowid"
        ))?;
        let documents = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    pub fn get_latest(conn: &Connection) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLS} FROM documents ORDER BY created_at DESC, rowid DESC \
                          LIMIT 1"),
                [],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn get_total(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?)
    }

    /// Whether this exact revision was already ingested.
    pub fn exists(
        conn: &Connection,
        scan_guid: &str,
        batch_name: &str,
        json_path: &str,
    ) -> Result<bool> {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents \
             WHERE scan_guid = ?1 AND batch_name = ?2 AND json_path = ?3",
            params![scan_guid, batch_name, json_path],
            |row| row.get(0),
        )?;
        Ok(total > 0)
    }

    /// Deleting a document alone is permitted and leaves its scan in place.
    pub fn delete(conn: &Connection, guid: &str) -> Result<bool> {
        let rows = conn.execute("DELETE FROM documents WHERE guid = ?1", params![guid])?;
        Ok(rows > 0)
    }

    /// Load the owning scan; a document without one is an integrity failure.
    pub fn scan(&self, conn: &Connection) -> Result<Scan> {
        Scan::get(conn, &self.scan_guid)?
            .ok_or_else(|| Error::not_found(format!("scan <{}> for document", self.scan_guid)))
    }

    /// Read this document's OCR text: UTF-8, trimmed, ASCII-transliterated.
    /// A missing or unreadable file logs a warning and reads as empty.
    pub fn get_text(&self, data_path: &Path) -> String {
        self.try_get_text(data_path).unwrap_or_else(|e| {
            warn!("error reading text for document <{}>: {e}", self.meta.guid);
            String::new()
        })
    }

    /// Read this document's OCR text, surfacing the IO error.
    pub fn try_get_text(&self, data_path: &Path) -> Result<String> {
        let path = data_path.join(&self.text_path);
        let raw = std::fs::read_to_string(path)?;
        Ok(deunicode(raw.trim()))
    }

    pub(crate) fn dict(&self, scan: &Scan) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("guid".into(), self.meta.guid.clone().into());
        map.insert("created_at".into(), to_rfc3339(&self.meta.created_at).into());
        map.insert("updated_at".into(), to_rfc3339(&self.meta.updated_at).into());
        map.insert("tags".into(), self.meta.tags.clone().into());
        map.insert("comment".into(), self.meta.comment.clone().into());
        map.insert("scan_guid".into(), self.scan_guid.clone().into());
        map.insert("batch_name".into(), self.batch_name.clone().into());
        map.insert("json_path".into(), self.json_path.clone().into());
        map.insert("json_url".into(), self.json_url.clone().into());
        map.insert("text_path".into(), self.text_path.clone().into());
        map.insert("text_url".into(), self.text_url.clone().into());
        map.insert("scan".into(), Value::Object(scan.dict()));
        map
    }

    /// Serialize with the owning scan nested under `scan`.
    pub fn as_dict(&self, scan: &Scan, excl: &HashSet<&str>, to_js: bool) -> Value {
        serialize::finish(self.dict(scan), excl, to_js)
    }
}

impl HasGuid for Document {
    fn guid(&self) -> &str {
        &self.meta.guid
    }
}
