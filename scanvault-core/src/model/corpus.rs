//! Corpuses: immutable snapshots of the document set.
//!
//! A corpus pins the exact document set a search ran against. Any change to
//! the collection necessarily changes search results, so searches bind to
//! the corpus that was latest when they were created and never migrate.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;
use crate::helpers::{parse_rfc3339, to_rfc3339};
use crate::model::document::Document;
use crate::model::record::{storage_ts, HasGuid, RecordMeta};
use crate::model::serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    pub meta: RecordMeta,
    /// 8-hex CRC32 over the concatenated text of all member documents in
    /// ascending creation order.
    pub checksum: String,
    pub document_count: i64,
}

const COLS: &str = "guid, created_at, updated_at, tags, comment, checksum, document_count";

impl Corpus {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: RecordMeta {
                guid: row.get(0)?,
                created_at: parse_rfc3339(&row.get::<_, String>(1)?),
                updated_at: parse_rfc3339(&row.get::<_, String>(2)?),
                tags: row.get(3)?,
                comment: row.get(4)?,
            },
            checksum: row.get(5)?,
            document_count: row.get(6)?,
        })
    }

    /// Persist a new corpus row and its membership. Membership never changes
    /// afterwards.
    pub fn create(
        conn: &Connection,
        checksum: String,
        document_guids: &[String],
    ) -> Result<Self> {
        let corpus = Self {
            meta: RecordMeta::new(),
            checksum,
            document_count: document_guids.len() as i64,
        };
        conn.execute(
            &format!("INSERT INTO corpuses ({COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                corpus.meta.guid,
                storage_ts(&corpus.meta.created_at),
                storage_ts(&corpus.meta.updated_at),
                corpus.meta.tags,
                corpus.meta.comment,
                corpus.checksum,
                corpus.document_count,
            ],
        )?;

        let mut stmt = conn.prepare(
            "INSERT INTO corpus_documents (corpus_guid, document_guid) VALUES (?1, ?2)",
        )?;
        for guid in document_guids {
            stmt.execute(params![corpus.meta.guid, guid])?;
        }
        Ok(corpus)
    }

    pub fn get(conn: &Connection, guid: &str) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLS} FROM corpuses WHERE guid = ?1"),
                params![guid],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM corpuses ORDER BY created_at DESC, rowid DESC"
        ))?;
        let corpuses = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(corpuses)
    }

    /// Return the most recent corpus.
    pub fn get_latest(conn: &Connection) -> Result<Option<Self>> {
        let result = conn
            .query_row(
                &format!("SELECT {COLS} FROM corpuses ORDER BY created_at DESC, rowid DESC \
                          LIMIT 1"),
                [],
                Self::from_row,
            )
            .optional()?;
        if result.is_none() {
            warn!("tried getting most recent corpus but none exist");
        }
        Ok(result)
    }

    pub fn get_total(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM corpuses", [], |row| row.get(0))?)
    }

    /// Member documents in ascending creation order.
    pub fn documents(&self, conn: &Connection) -> Result<Vec<Document>> {
        let mut stmt = conn.prepare(
            "SELECT d.guid, d.created_at, d.updated_at, d.tags, d.comment, d.scan_guid, \
                    d.batch_name, d.json_path, d.json_url, d.text_path, d.text_url \
             FROM documents d \
             JOIN corpus_documents cd ON cd.document_guid = d.guid \
             WHERE cd.corpus_guid = ?1 \
             ORDER BY d.created_at, d.rowid",
        )?;
        let documents = stmt
            .query_map(params![self.meta.guid], Document::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    /// Whether a document belongs to this corpus.
    pub fn contains(&self, conn: &Connection, document_guid: &str) -> Result<bool> {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM corpus_documents \
             WHERE corpus_guid = ?1 AND document_guid = ?2",
            params![self.meta.guid, document_guid],
            |row| row.get(0),
        )?;
        Ok(total > 0)
    }

    pub(crate) fn dict(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("guid".into(), self.meta.guid.clone().into());
        map.insert("created_at".into(), to_rfc3339(&self.meta.created_at).into());
        map.insert("updated_at".into(), to_rfc3339(&self.meta.updated_at).into());
        map.insert("tags".into(), self.meta.tags.clone().into());
        map.insert("comment".into(), self.meta.comment.clone().into());
        map.insert("checksum".into(), self.checksum.clone().into());
        map.insert("document_count".into(), self.document_count.into());
        map
    }

    pub fn as_dict(&self, excl: &HashSet<&str>, to_js: bool) -> Value {
        serialize::finish(self.dict(), excl, to_js)
    }
}

impl HasGuid for Corpus {
    fn guid(&self) -> &str {
        &self.meta.guid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::model::scan::Scan;

    fn seed_documents(db: &Db, count: usize) -> Vec<Document> {
        let mut documents = Vec::new();
        db.write(|conn| {
            for i in documents.len()..count {
                let scan = Scan {
                    meta: RecordMeta::new(),
                    stem: format!("{:06}_2022-09-27_13-12-42_image_{i}", i + 1),
                    album: "2022-09".into(),
                    album_index: (i + 1) as i64,
                    title: format!("image_{i}"),
                    path: format!("img/2022-09/{i}.webp"),
                    url: format!("https://cdn.test/img/2022-09/{i}.webp"),
                    thumb_url: format!("https://cdn.test/thumbs/2022-09/{i}.webp"),
                    scanned_at: crate::helpers::utc_now(),
                    media_archive: None,
                    media_collection: None,
                    media_box: None,
                    media_folder: None,
                    media_type: None,
                    media_created_at: crate::helpers::epoch(),
                };
                scan.insert(conn)?;
                let document = Document {
                    meta: RecordMeta::new(),
                    scan_guid: scan.meta.guid.clone(),
                    batch_name: "00".into(),
                    json_path: format!("00/json/2022-09/{i}.json"),
                    json_url: format!("https://cdn.test/00/json/2022-09/{i}.json"),
                    text_path: format!("00/text/2022-09/{i}.txt"),
                    text_url: format!("https://cdn.test/00/text/2022-09/{i}.txt"),
                };
                document.insert(conn)?;
                documents.push(document);
            }
            Ok(())
        })
        .expect("seed");
        documents
    }

    #[test]
    fn create_links_documents_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let documents = seed_documents(&db, 3);
        let guids: Vec<String> = documents.iter().map(|d| d.meta.guid.clone()).collect();

        let corpus = db
            .write(|conn| Corpus::create(conn, "deadbeef".into(), &guids))
            .expect("create");
        assert_eq!(corpus.document_count, 3);

        let members = db
            .read(|conn| corpus.documents(conn))
            .expect("documents");
        let member_guids: Vec<String> = members.iter().map(|d| d.meta.guid.clone()).collect();
        assert_eq!(member_guids, guids);

        for guid in &guids {
            assert!(db.read(|conn| corpus.contains(conn, guid)).expect("contains"));
        }
        assert!(!db
            .read(|conn| corpus.contains(conn, "missing"))
            .expect("contains"));
    }

    #[test]
    fn get_latest_returns_newest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");

        assert!(db
            .read(|conn| Corpus::get_latest(conn))
            .expect("latest")
            .is_none());

        let first = db
            .write(|conn| Corpus::create(conn, "11111111".into(), &[]))
            .expect("first");
        let second = db
            .write(|conn| Corpus::create(conn, "22222222".into(), &[]))
            .expect("second");

        let latest = db
            .read(|conn| Corpus::get_latest(conn))
            .expect("latest")
            .expect("some");
        assert_eq!(latest.meta.guid, second.meta.guid);
        assert_ne!(latest.meta.guid, first.meta.guid);
        assert_eq!(db.read(|conn| Corpus::get_total(conn)).expect("total"), 2);
    }
}
