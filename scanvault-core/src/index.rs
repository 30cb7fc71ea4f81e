//! Corpus snapshots and the on-disk full-text index.
//!
//! After an ingest batch completes, the indexer snapshots a corpus (CRC32
//! over the ordered document text) and rebuilds the tantivy index from
//! scratch. The index stores `{guid, content}` per document; fuzzy queries
//! come from the searcher, not the schema.

use std::path::{Path, PathBuf};

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexWriter, TantivyDocument, Term};
use tracing::{info, warn};

use crate::db::Db;
use crate::error::Result;
use crate::helpers::{create_checksum, on_batch_boundary};
use crate::model::{Corpus, Document};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Handle to the on-disk inverted index.
pub struct TextIndex {
    index: Index,
    guid_field: Field,
    content_field: Field,
}

impl TextIndex {
    fn schema() -> (Schema, Field, Field) {
        let mut builder = Schema::builder();
        let guid_field = builder.add_text_field("guid", STRING | STORED);
        let content_field = builder.add_text_field("content", TEXT | STORED);
        (builder.build(), guid_field, content_field)
    }

    /// Create a fresh index at `path`, wiping any previous one first.
    pub fn create(path: &Path) -> Result<Self> {
        if path.is_dir() && path.read_dir()?.next().is_some() {
            info!("previous index found at {}, resetting", path.display());
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(path)?;

        let (schema, guid_field, content_field) = Self::schema();
        let index = Index::create_in_dir(path, schema)?;
        Ok(Self {
            index,
            guid_field,
            content_field,
        })
    }

    /// Open an existing index read-only (no writer is created).
    pub fn open(path: &Path) -> Result<Self> {
        let index = Index::open_in_dir(path)?;
        let (_, guid_field, content_field) = Self::schema();
        Ok(Self {
            index,
            guid_field,
            content_field,
        })
    }

    /// Single writer; callers keep it to one task at a time.
    pub fn writer(&self) -> Result<IndexWriter> {
        Ok(self.index.writer(WRITER_HEAP_BYTES)?)
    }

    pub fn add_document(&self, writer: &IndexWriter, guid: &str, content: &str) -> Result<()> {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.guid_field, guid);
        doc.add_text(self.content_field, content);
        writer.add_document(doc)?;
        Ok(())
    }

    /// Run a parsed (fuzzy-capable) query and return matching document GUIDs.
    ///
    /// `word~N` enables edit-distance-N matching for that term; everything
    /// else goes through the query parser. Terms combine conjunctively.
    pub fn search_guids(&self, search_str: &str) -> Result<Vec<String>> {
        let reader = self.index.reader()?;
        let searcher = reader.searcher();

        let query = self.build_query(search_str)?;
        let limit = searcher.num_docs().max(1) as usize;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut guids = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(guid) = doc.get_first(self.guid_field).and_then(|v| v.as_str()) {
                guids.push(guid.to_string());
            }
        }
        Ok(guids)
    }

    fn build_query(&self, search_str: &str) -> Result<Box<dyn Query>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let mut plain_terms: Vec<&str> = Vec::new();

        for token in search_str.split_whitespace() {
            match parse_fuzzy_term(token) {
                Some((word, distance)) => {
                    let term =
                        Term::from_field_text(self.content_field, &word.to_lowercase());
                    clauses.push((
                        Occur::Must,
                        Box::new(FuzzyTermQuery::new(term, distance, true)),
                    ));
                }
                None => plain_terms.push(token),
            }
        }

        if !plain_terms.is_empty() {
            let mut parser = QueryParser::for_index(&self.index, vec![self.content_field]);
            parser.set_conjunction_by_default();
            clauses.push((Occur::Must, parser.parse_query(&plain_terms.join(" "))?));
        }

        if clauses.len() == 1 {
            let (_, query) = clauses.remove(0);
            Ok(query)
        } else {
            Ok(Box::new(BooleanQuery::new(clauses)))
        }
    }
}

/// Split a `word~N` token into its term and edit distance. Distances are
/// capped at 2, the automaton limit.
fn parse_fuzzy_term(token: &str) -> Option<(String, u8)> {
    let (word, suffix) = token.rsplit_once('~')?;
    if word.is_empty() {
        return None;
    }
    let distance: u8 = suffix.parse().ok()?;
    Some((word.to_string(), distance.min(2)))
}

/// Outcome of one indexer run.
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub corpus: Corpus,
    pub indexed: usize,
    pub unreadable: usize,
}

/// Snapshots a corpus and rebuilds the full-text index from the database.
#[derive(Clone)]
pub struct Indexer {
    db: Db,
    data_path: PathBuf,
    index_path: PathBuf,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        db: Db,
        data_path: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            data_path: data_path.into(),
            index_path: index_path.into(),
            batch_size,
        }
    }

    /// Snapshot a corpus over the current document set, then rebuild the
    /// index in the same order. Re-running on an unchanged database produces
    /// the same checksum.
    pub fn rebuild(&self) -> Result<IndexReport> {
        let (corpus, documents) = self.snapshot_corpus()?;

        let index = TextIndex::create(&self.index_path)?;
        let mut writer = index.writer()?;
        let total = documents.len();
        let mut indexed = 0;
        let mut unreadable = 0;

        for (i, document) in documents.iter().enumerate() {
            if on_batch_boundary(i, total, self.batch_size) {
                info!("indexing documents ({}/{total})", i + 1);
            }
            match document.try_get_text(&self.data_path) {
                Ok(text) => {
                    index.add_document(&writer, &document.meta.guid, &text)?;
                    indexed += 1;
                }
                Err(e) => {
                    warn!("error parsing {}: {e}", document.text_path);
                    unreadable += 1;
                }
            }
        }

        // Long commit; no db latch is held here.
        info!("finalizing index at {}, this could take some time",
              self.index_path.display());
        writer.commit()?;
        info!("done indexing {indexed} documents ({unreadable} unreadable)");

        Ok(IndexReport {
            corpus,
            indexed,
            unreadable,
        })
    }

    fn snapshot_corpus(&self) -> Result<(Corpus, Vec<Document>)> {
        self.db.with_session(|session| {
            session.begin()?;
            let documents = Document::get_all(session.conn())?;
            info!(
                "creating corpus snapshot for {} documents, this may take some time",
                documents.len()
            );

            let mut concatenated = String::new();
            for document in &documents {
                concatenated.push_str(&document.get_text(&self.data_path));
            }
            let checksum = create_checksum(&concatenated);
            info!("corpus checksum: {checksum}");

            let guids: Vec<String> =
                documents.iter().map(|d| d.meta.guid.clone()).collect();
            let corpus = Corpus::create(session.conn(), checksum, &guids)?;
            session.commit()?;
            Ok((corpus, documents))
        })
    }
}
