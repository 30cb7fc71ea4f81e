//! Pipeline orchestration: Ingest→Index and Search→(Build→Upload)×filetype,
//! plus the exclusive "loading" latch that keeps the two phases apart.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::export::MegadocBuilder;
use crate::index::{IndexReport, Indexer};
use crate::ingest::{IngestStats, Ingestor};
use crate::search::Searcher;
use crate::model::{Search, Status, FILETYPES};
use crate::upload::Uploader;

/// Outcome of a full ingest→index run.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub albums: usize,
    pub ingest: IngestStats,
    pub index: IndexReport,
}

/// RAII guard for the loading latch; dropping it releases the latch.
pub struct LoadGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Composes the pipeline stages over one database and one configuration.
///
/// An ingest/index run and any search run must never overlap: the loading
/// latch is held for the entire ingest/index duration and search entry
/// points fail fast with busy while it is held.
pub struct Pipeline {
    db: Db,
    config: Arc<Config>,
    uploader: Option<Uploader>,
    loading: Arc<AtomicBool>,
    file_permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// `uploader` may be `None` when no object-store credentials are
    /// available; built megadocs then stay in `SENDING` for a later upload.
    pub fn new(db: Db, config: Arc<Config>, uploader: Option<Uploader>) -> Self {
        let file_permits = Arc::new(Semaphore::new(config.app.open_file_limit.max(1)));
        Self {
            db,
            config,
            uploader,
            loading: Arc::new(AtomicBool::new(false)),
            file_permits,
            cancel: CancellationToken::new(),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether an ingest/index run currently holds the latch.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Signal every in-flight task to stop at its next boundary.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn begin_loading(&self) -> Result<LoadGuard> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy("load already in progress"));
        }
        Ok(LoadGuard {
            flag: self.loading.clone(),
        })
    }

    /// Ingest every album under `path`, then snapshot a corpus and rebuild
    /// the index. One ingestor failure does not abort its siblings, but the
    /// indexer only runs when all of them succeed.
    pub async fn start_load(&self, path: &Path) -> Result<LoadReport> {
        let _guard = self.begin_loading()?;

        if !path.is_dir() {
            return Err(Error::bad_input(format!("bad path: {}", path.display())));
        }
        let albums: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        if albums.is_empty() {
            return Err(Error::bad_input(format!(
                "no albums in path: {}",
                path.display()
            )));
        }

        info!("starting load of {} albums from {}", albums.len(), path.display());
        let album_count = albums.len();
        let mut tasks: JoinSet<Result<IngestStats>> = JoinSet::new();
        for album in albums {
            let ingestor = Ingestor::new(
                self.db.clone(),
                self.config.app.batch_name.clone(),
                self.config.s3.url.clone(),
                self.config.db.batch_size,
            );
            let cancel = self.cancel.child_token();
            let permit = self
                .file_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                ingestor.ingest_album(&album, &cancel)
            });
        }

        let mut ingest = IngestStats::default();
        let mut failures = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(stats)) => {
                    ingest.files += stats.files;
                    ingest.scans_created += stats.scans_created;
                    ingest.documents_created += stats.documents_created;
                    ingest.documents_skipped += stats.documents_skipped;
                    ingest.bad_files += stats.bad_files;
                }
                Ok(Err(e)) => {
                    error!("album import failed: {e}");
                    failures += 1;
                }
                Err(e) => {
                    error!("album import task panicked: {e}");
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            return Err(Error::Other(anyhow::anyhow!(
                "{failures} of {album_count} album imports failed; indexer not run"
            )));
        }

        let indexer = Indexer::new(
            self.db.clone(),
            self.config.data_path(),
            self.config.index_path(),
            self.config.db.batch_size,
        );
        let index = tokio::task::spawn_blocking(move || indexer.rebuild())
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!(e)))??;

        Ok(LoadReport {
            albums: album_count,
            ingest,
            index,
        })
    }

    /// Create a `PENDING` search, failing fast while a load holds the latch.
    pub fn create_search(&self, search_str: &str) -> Result<Search> {
        if self.is_loading() {
            return Err(Error::Busy("load in progress"));
        }
        self.searcher().create_search(search_str)
    }

    /// Execute a created search, then fan out Build→Upload per filetype.
    ///
    /// Filetypes proceed in parallel; within one filetype, build and upload
    /// are strictly sequential. A builder failure for one filetype does not
    /// affect the others, and an exhausted upload leaves its megadoc in
    /// `SENDING`.
    pub async fn run_search(&self, search_guid: &str, filetypes: &[String]) -> Result<()> {
        for filetype in filetypes {
            if !FILETYPES.contains(&filetype.to_lowercase().as_str()) {
                return Err(Error::NotImplemented(filetype.clone()));
            }
        }

        let searcher = self.searcher();
        let guid = search_guid.to_string();
        tokio::task::spawn_blocking(move || searcher.execute(&guid))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!(e)))??;

        let mut tasks: JoinSet<()> = JoinSet::new();
        for filetype in filetypes {
            let builder = MegadocBuilder::new(
                self.db.clone(),
                self.config.data_path(),
                self.config.megadoc_path(),
                self.config.s3.url.clone(),
            );
            let uploader = self.uploader.clone();
            let db = self.db.clone();
            let data_path = self.config.data_path();
            let cancel = self.cancel.child_token();
            let filetype = filetype.clone();
            let search_guid = search_guid.to_string();
            let permit = self
                .file_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;

            tasks.spawn(async move {
                let _permit = permit;
                let build_cancel = cancel.clone();
                let build_type = filetype.clone();
                let built = tokio::task::spawn_blocking(move || {
                    builder.build(&search_guid, &build_type, &build_cancel)
                })
                .await;

                match built {
                    Ok(Ok(Some(mut megadoc))) => {
                        if megadoc.status != Status::Sending {
                            return;
                        }
                        match &uploader {
                            Some(uploader) => {
                                if let Err(e) = uploader
                                    .upload_megadoc(&db, &mut megadoc, &data_path, &cancel)
                                    .await
                                {
                                    error!(
                                        "upload of megadoc <{}> failed: {e}",
                                        megadoc.meta.guid
                                    );
                                }
                            }
                            None => warn!(
                                "no object store configured; megadoc <{}> left in SENDING",
                                megadoc.meta.guid
                            ),
                        }
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => error!("{filetype} megadoc build failed: {e}"),
                    Err(e) => error!("{filetype} megadoc task panicked: {e}"),
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Create and fully run a search pipeline, returning the final search.
    pub async fn start_search(&self, search_str: &str, filetypes: &[String]) -> Result<Search> {
        let search = self.create_search(search_str)?;
        self.run_search(&search.meta.guid, filetypes).await?;
        self.db
            .read(|conn| Search::get(conn, &search.meta.guid))?
            .ok_or_else(|| Error::not_found(format!("search <{}>", search.meta.guid)))
    }

    fn searcher(&self) -> Searcher {
        Searcher::new(self.db.clone(), self.config.index_path())
    }
}
