//! Search execution: bind a query to the latest corpus, run it against the
//! full-text index, and attach the matching documents.

use std::path::PathBuf;

use tracing::info;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::index::TextIndex;
use crate::model::{Corpus, Document, Search, Status};

/// Minimum accepted query length, in characters.
pub const MIN_SEARCH_LEN: usize = 3;

#[derive(Clone)]
pub struct Searcher {
    db: Db,
    index_path: PathBuf,
}

impl Searcher {
    pub fn new(db: Db, index_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            index_path: index_path.into(),
        }
    }

    /// Create a `PENDING` search bound to the latest corpus.
    pub fn create_search(&self, search_str: &str) -> Result<Search> {
        let search_str = search_str.trim();
        if search_str.chars().count() < MIN_SEARCH_LEN {
            return Err(Error::bad_input(format!(
                "invalid search string '{search_str}'"
            )));
        }

        self.db.with_session(|session| {
            session.begin()?;
            let corpus = Corpus::get_latest(session.conn())?.ok_or(Error::NoCorpus)?;
            let search = Search::create(session.conn(), search_str, &corpus)?;
            session.commit()?;
            Ok(search)
        })
    }

    /// Run the query for an existing search and attach every hit.
    ///
    /// The first attach flips `PENDING → STARTED`; exhaustion of the hit
    /// stream sets `SUCCESS`. A hit whose document is missing from the
    /// database means the index is stale and the run fails fatally.
    pub fn execute(&self, search_guid: &str) -> Result<Search> {
        let mut search = self
            .db
            .read(|conn| Search::get(conn, search_guid))?
            .ok_or_else(|| Error::not_found(format!("search <{search_guid}>")))?;

        info!("starting search '{}' <{}>", search.search_str, search.meta.guid);
        let index = TextIndex::open(&self.index_path)?;
        let guids = index.search_guids(&search.search_str)?;

        for guid in guids {
            self.db.write(|conn| {
                let document = Document::get(conn, &guid)?
                    .ok_or_else(|| Error::IndexOutOfSync { guid: guid.clone() })?;
                if search.status == Status::Pending {
                    search.set_status(conn, Status::Started)?;
                }
                search.add_document(conn, &document.meta.guid)?;
                Ok(())
            })?;
        }

        let total = self.db.read(|conn| search.document_count(conn))?;
        self.db
            .write(|conn| search.set_status(conn, Status::Success))?;
        info!(
            "finished search '{}' <{}> with {total} results",
            search.search_str, search.meta.guid
        );
        Ok(search)
    }

    /// Create and immediately execute a search.
    pub fn run(&self, search_str: &str) -> Result<Search> {
        let search = self.create_search(search_str)?;
        self.execute(&search.meta.guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::index::Indexer;
    use crate::ingest::Ingestor;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    fn seed_and_index(root: &Path, texts: &[&str]) -> Db {
        let album_dir = root.join("data/00/json/2022-09");
        std::fs::create_dir_all(&album_dir).expect("mkdir");
        let text_dir = root.join("data/00/text/2022-09");
        std::fs::create_dir_all(&text_dir).expect("mkdir");
        for (i, text) in texts.iter().enumerate() {
            let stem = format!("{:06}_2022-09-27_13-12-4{i}_image_599{i}", i + 1);
            std::fs::write(album_dir.join(format!("{stem}.json")), "{}").expect("json");
            std::fs::write(text_dir.join(format!("{stem}.txt")), text).expect("text");
        }

        let db = Db::open(root.join("scanvault.db"), 3).expect("db");
        Ingestor::new(db.clone(), "00", "https://cdn.test", 10_000)
            .ingest_album(&album_dir, &CancellationToken::new())
            .expect("ingest");
        Indexer::new(db.clone(), root.join("data"), root.join("data/00/index"), 10_000)
            .rebuild()
            .expect("index");
        db
    }

    fn searcher(root: &Path, db: &Db) -> Searcher {
        Searcher::new(db.clone(), root.join("data/00/index"))
    }

    #[test]
    fn short_query_is_bad_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let searcher = searcher(dir.path(), &db);
        assert!(matches!(searcher.create_search("ab"), Err(Error::BadInput(_))));
    }

    #[test]
    fn three_chars_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = seed_and_index(dir.path(), &["abc"]);
        let search = searcher(dir.path(), &db)
            .create_search("abc")
            .expect("create");
        assert_eq!(search.status, Status::Pending);
    }

    #[test]
    fn search_without_corpus_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(dir.path().join("test.db"), 3).expect("db");
        let result = searcher(dir.path(), &db).create_search("hello");
        assert!(matches!(result, Err(Error::NoCorpus)));
    }

    #[test]
    fn happy_path_attaches_all_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = seed_and_index(
            dir.path(),
            &[
                "Hello from Document #1",
                "Hello from Document #2",
                "Hello from Document #3",
            ],
        );
        let search = searcher(dir.path(), &db).run("Hello").expect("run");
        assert_eq!(search.status, Status::Success);

        let (count, documents) = db
            .read(|conn| Ok((search.document_count(conn)?, search.documents(conn)?)))
            .expect("results");
        assert_eq!(count, 3);

        // results walk in ascending creation order, and every one belongs
        // to the bound corpus
        let corpus = db.read(|conn| search.corpus(conn)).expect("corpus");
        let member_guids: Vec<String> = db
            .read(|conn| Ok(corpus.documents(conn)?.iter().map(|d| d.meta.guid.clone()).collect()))
            .expect("members");
        let result_guids: Vec<String> =
            documents.iter().map(|d| d.meta.guid.clone()).collect();
        assert_eq!(result_guids, member_guids);
    }

    #[test]
    fn fuzzy_query_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = seed_and_index(
            dir.path(),
            &["Hello from Document #1", "Hello from Document #2"],
        );
        let search = searcher(dir.path(), &db).run("Hella~1").expect("run");
        let count = db
            .read(|conn| search.document_count(conn))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn no_hits_still_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = seed_and_index(dir.path(), &["Hello from Document #1"]);
        let search = searcher(dir.path(), &db).run("unmatched").expect("run");
        assert_eq!(search.status, Status::Success);
        assert_eq!(
            db.read(|conn| search.document_count(conn)).expect("count"),
            0
        );
    }

    #[test]
    fn search_binds_to_corpus_at_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = seed_and_index(dir.path(), &["Hello from Document #1"]);
        let searcher = searcher(dir.path(), &db);
        let search = searcher.run("Hello").expect("run");
        let first_corpus = search.corpus_guid.clone();

        // a new snapshot appears after the search was created
        Indexer::new(
            db.clone(),
            dir.path().join("data"),
            dir.path().join("data/00/index"),
            10_000,
        )
        .rebuild()
        .expect("reindex");

        let reloaded = db
            .read(|conn| Search::get(conn, &search.meta.guid))
            .expect("get")
            .expect("some");
        assert_eq!(reloaded.corpus_guid, first_corpus);
    }
}
