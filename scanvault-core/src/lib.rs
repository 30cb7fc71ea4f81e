//! # scanvault-core
//!
//! Core engine for the scanvault OCR archive: ingest batches of scanned
//! documents into SQLite, snapshot them into immutable corpuses, maintain a
//! tantivy full-text index, run fuzzy-capable searches, and compile the
//! results into downloadable megadoc artifacts shipped to object storage.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scanvault_core::{Config, Db, Pipeline};
//!
//! # async fn run() -> scanvault_core::Result<()> {
//! let config = Arc::new(Config::load()?);
//! let db = Db::open(&config.db.sql_path, config.db.retries)?;
//! let pipeline = Pipeline::new(db, config.clone(), None);
//!
//! // ingest + index a batch of albums
//! pipeline
//!     .start_load(&config.data_path().join(&config.app.batch_name).join("json"))
//!     .await?;
//!
//! // search it and compile megadocs
//! let search = pipeline
//!     .start_search("annual report", &config.app.megadoc_types)
//!     .await?;
//! println!("search <{}> finished as {}", search.meta.guid, search.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod helpers;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod search;
pub mod upload;

pub use config::Config;
pub use db::{Db, Session};
pub use error::{Error, Result};
pub use export::MegadocBuilder;
pub use index::{IndexReport, Indexer, TextIndex};
pub use ingest::{IngestStats, Ingestor};
pub use model::{Corpus, Document, Megadoc, Scan, Search, Status, FILETYPES};
pub use pipeline::{LoadReport, Pipeline};
pub use search::Searcher;
pub use upload::Uploader;
