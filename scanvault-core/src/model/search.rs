//! Searches: user queries bound to the corpus that was latest at creation,
//! their matched documents, and their generated megadocs.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::helpers::{parse_rfc3339, to_rfc3339};
use crate::model::corpus::Corpus;
use crate::model::document::Document;
use crate::model::megadoc::Megadoc;
use crate::model::record::{storage_ts, HasGuid, HasStatus, RecordMeta, Status};
use crate::model::serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub meta: RecordMeta,
    pub status: Status,
    pub search_str: String,
    pub corpus_guid: String,
}

const COLS: &str = "guid, created_at, updated_at, tags, comment, status, search_str, corpus_guid";

impl Search {
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
            search_str: row.get(6)?,
            corpus_guid: row.get(7)?,
        })
    }

    /// Create a search bound to the given corpus, status `PENDING`.
    pub fn create(conn: &Connection, search_str: &str, corpus: &Corpus) -> Result<Self> {
        let search = Self {
            meta: RecordMeta::new(),
            status: Status::Pending,
            search_str: search_str.to_string(),
            corpus_guid: corpus.meta.guid.clone(),
        };
        conn.execute(
            &format!("INSERT INTO searches ({COLS}) \
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                search.meta.guid,
                storage_ts(&search.meta.created_at),
                storage_ts(&search.meta.updated_at),
                search.meta.tags,
                search.meta.comment,
                search.status.as_str(),
                search.search_str,
                search.corpus_guid,
            ],
        )?;
        Ok(search)
    }

    pub fn get(conn: &Connection, guid: &str) -> Result<Option<Self>> {
        let result = conn
            .query_row(
                &format!("SELECT {COLS} FROM searches WHERE guid = ?1"),
                params![guid],
                Self::from_row,
            )
            .optional()?;
        if result.is_none() {
            debug!("no search with guid {guid}");
        }
        Ok(result)
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM searches ORDER BY created_at DESC, rowid DESC"
        ))?;
        let searches = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(searches)
    }

    pub fn get_latest(conn: &Connection) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLS} FROM searches ORDER BY created_at DESC, rowid DESC \
                          LIMIT 1"),
                [],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn get_total(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM searches", [], |row| row.get(0))?)
    }

    /// Delete this search; result links and megadocs cascade away.
    pub fn delete(conn: &Connection, guid: &str) -> Result<bool> {
        let rows = conn.execute("DELETE FROM searches WHERE guid = ?1", params![guid])?;
        Ok(rows > 0)
    }

    /// Advance the lifecycle `PENDING → STARTED → SUCCESS`.
    pub fn set_status(&mut self, conn: &Connection, status: Status) -> Result<()> {
        if !self.status.can_advance_to(status) {
            return Err(Error::IllegalTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        debug!("setting status of search <{}> to {status}", self.meta.guid);
        self.status = status;
        self.meta.touch();
        conn.execute(
            "UPDATE searches SET status = ?1, updated_at = ?2 WHERE guid = ?3",
            params![
                self.status.as_str(),
                storage_ts(&self.meta.updated_at),
                self.meta.guid
            ],
        )?;
        Ok(())
    }

    /// Attach a matched document. Returns `false` (with a warning) when the
    /// document is already attached.
    pub fn add_document(&mut self, conn: &Connection, document_guid: &str) -> Result<bool> {
        if self.contains_document(conn, document_guid)? {
            warn!(
                "tried re-adding document <{document_guid}> to search '{}' <{}>",
                self.search_str, self.meta.guid
            );
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO search_documents (search_guid, document_guid) VALUES (?1, ?2)",
            params![self.meta.guid, document_guid],
        )?;
        self.meta.touch();
        conn.execute(
            "UPDATE searches SET updated_at = ?1 WHERE guid = ?2",
            params![storage_ts(&self.meta.updated_at), self.meta.guid],
        )?;
        Ok(true)
    }

    pub fn contains_document(&self, conn: &Connection, document_guid: &str) -> Result<bool> {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_documents \
             WHERE search_guid = ?1 AND document_guid = ?2",
            params![self.meta.guid, document_guid],
            |row| row.get(0),
        )?;
        Ok(total > 0)
    }

    /// Matched documents in ascending creation order — the megadoc section
    /// order.
    pub fn documents(&self, conn: &Connection) -> Result<Vec<Document>> {
        let mut stmt = conn.prepare(
            "SELECT d.guid, d.created_at, d.updated_at, d.tags, d.comment, d.scan_guid, \
                    d.batch_name, d.json_path, d.json_url, d.text_path, d.text_url \
             FROM documents d \
             JOIN search_documents sd ON sd.document_guid = d.guid \
             WHERE sd.search_guid = ?1 \
             ORDER BY d.created_at, d.rowid",
        )?;
        let documents = stmt
            .query_map(params![self.meta.guid], Document::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    pub fn document_count(&self, conn: &Connection) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM search_documents WHERE search_guid = ?1",
            params![self.meta.guid],
            |row| row.get(0),
        )?)
    }

    pub fn megadocs(&self, conn: &Connection) -> Result<Vec<Megadoc>> {
        Megadoc::for_search(conn, &self.meta.guid)
    }

    pub fn corpus(&self, conn: &Connection) -> Result<Corpus> {
        Corpus::get(conn, &self.corpus_guid)?
            .ok_or_else(|| Error::not_found(format!("corpus <{}> for search", self.corpus_guid)))
    }

    pub(crate) fn dict(
        &self,
        corpus: &Corpus,
        megadocs: &[(Megadoc, u64)],
        document_count: i64,
    ) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("guid".into(), self.meta.guid.clone().into());
        map.insert("created_at".into(), to_rfc3339(&self.meta.created_at).into());
        map.insert("updated_at".into(), to_rfc3339(&self.meta.updated_at).into());
        map.insert("tags".into(), self.meta.tags.clone().into());
        map.insert("comment".into(), self.meta.comment.clone().into());
        map.insert("status".into(), self.status.as_str().into());
        map.insert("search_str".into(), self.search_str.clone().into());
        map.insert("document_count".into(), document_count.into());
        map.insert(
            "corpus".into(),
            Value::Object({
                let mut corpus_map = Map::new();
                corpus_map.insert("guid".into(), corpus.meta.guid.clone().into());
                corpus_map.insert("checksum".into(), corpus.checksum.clone().into());
                corpus_map
            }),
        );
        map.insert(
            "megadocs".into(),
            Value::Array(
                megadocs
                    .iter()
                    .map(|(megadoc, filesize)| Value::Object(megadoc.dict(*filesize)))
                    .collect(),
            ),
        );
        map
    }

    /// Serialize with corpus reference, result count, and megadoc list.
    /// `megadocs` pairs each megadoc with its current file size.
    pub fn as_dict(
        &self,
        corpus: &Corpus,
        megadocs: &[(Megadoc, u64)],
        document_count: i64,
        excl: &HashSet<&str>,
        to_js: bool,
    ) -> Value {
        serialize::finish(self.dict(corpus, megadocs, document_count), excl, to_js)
    }
}

impl HasGuid for Search {
    fn guid(&self) -> &str {
        &self.meta.guid
    }
}

impl HasStatus for Search {
    fn status(&self) -> Status {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn seed(db: &Db) -> Search {
        db.write(|conn| {
            let corpus = Corpus::create(conn, "deadbeef".into(), &[])?;
            Search::create(conn, "hello world", &corpus)
        })
        .expect("seed")
    }

    #[test]
    fn create_binds_to_corpus_and_starts_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let search = seed(&db);

        assert_eq!(search.status, Status::Pending);
        let loaded = db
            .read(|conn| Search::get(conn, &search.meta.guid))
            .expect("get")
            .expect("some");
        assert_eq!(loaded.search_str, "hello world");

        let corpus = db.read(|conn| loaded.corpus(conn)).expect("corpus");
        assert_eq!(corpus.checksum, "deadbeef");
    }

    #[test]
    fn status_cannot_backtrack() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let mut search = seed(&db);

        db.write(|conn| search.set_status(conn, Status::Started))
            .expect("started");
        db.write(|conn| search.set_status(conn, Status::Success))
            .expect("success");

        let result = db.write(|conn| search.set_status(conn, Status::Pending));
        assert!(matches!(result, Err(Error::IllegalTransition { .. })));

        let loaded = db
            .read(|conn| Search::get(conn, &search.meta.guid))
            .expect("get")
            .expect("some");
        assert_eq!(loaded.status, Status::Success);
    }

    #[test]
    fn duplicate_document_attach_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let mut search = seed(&db);

        // the document row itself, minimal
        db.write(|conn| {
            conn.execute(
                "INSERT INTO scans (guid, created_at, updated_at, stem, album, album_index, \
                 title, path, url, thumb_url, scanned_at)
                 VALUES ('s1', 'now', 'now', 'stem', 'album', 1, 't', 'p', 'u', 'tu', 'now')",
                [],
            )?;
            conn.execute(
                "INSERT INTO documents (guid, created_at, updated_at, scan_guid, batch_name, \
                 json_path, json_url, text_path, text_url)
                 VALUES ('d1', 'now', 'now', 's1', '00', 'jp', 'ju', 'tp', 'tu')",
                [],
            )?;
            Ok(())
        })
        .expect("seed doc");

        assert!(db
            .write(|conn| search.add_document(conn, "d1"))
            .expect("attach"));
        assert!(!db
            .write(|conn| search.add_document(conn, "d1"))
            .expect("re-attach"));
        assert_eq!(
            db.read(|conn| search.document_count(conn)).expect("count"),
            1
        );
    }

    #[test]
    fn delete_cascades_result_links() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let search = seed(&db);

        assert!(db
            .write(|conn| Search::delete(conn, &search.meta.guid))
            .expect("delete"));
        assert!(!db
            .write(|conn| Search::delete(conn, &search.meta.guid))
            .expect("second delete"));
    }

    #[test]
    fn as_dict_embeds_corpus_and_megadocs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let search = seed(&db);
        let corpus = db.read(|conn| search.corpus(conn)).expect("corpus");

        let dict = search.as_dict(&corpus, &[], 0, &HashSet::new(), true);
        assert_eq!(dict["searchStr"], "hello world");
        assert_eq!(dict["status"], "PENDING");
        assert_eq!(dict["corpus"]["checksum"], "deadbeef");
        assert_eq!(dict["documentCount"], 0);
        assert!(dict["megadocs"].as_array().expect("array").is_empty());
    }
}
