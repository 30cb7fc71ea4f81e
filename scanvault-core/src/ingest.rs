//! Batch ingestion: walks a directory of OCR output and turns filenames into
//! scan and document rows, committing in batches.
//!
//! The ingestor never reads document content; it only parses filenames of
//! the form `INDEX_YYYY-MM-DD_HH-MM-SS_TITLE.json` under an album directory.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::Db;
use crate::error::{Error, Result};
use crate::helpers::{natural_cmp, on_batch_boundary};
use crate::model::record::RecordMeta;
use crate::model::{Document, Scan};

/// Filename fields parsed from a scan stem.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStem {
    pub stem: String,
    pub album: String,
    pub album_index: i64,
    pub title: String,
    pub scanned_at: chrono::DateTime<chrono::Utc>,
}

/// Parse `<album>/<INDEX>_<YYYY-MM-DD>_<HH-MM-SS>_<TITLE>.<ext>` into its
/// fields. Anything that does not fit the schema is a bad-input error.
pub fn parse_scan_filename(path: &Path) -> Result<ParsedStem> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::bad_input(format!("unreadable filename: {}", path.display())))?
        .to_string();

    let album = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    if album.is_empty() {
        return Err(Error::bad_input(format!(
            "no album directory for {}",
            path.display()
        )));
    }

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return Err(Error::bad_input(format!("malformed stem '{stem}'")));
    }

    let album_index: i64 = parts[0]
        .parse()
        .map_err(|_| Error::bad_input(format!("bad index '{}' in '{stem}'", parts[0])))?;

    let raw_ts = format!("{} {}", parts[1], parts[2].replace('-', ":"));
    let scanned_at = NaiveDateTime::parse_from_str(&raw_ts, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| Error::bad_input(format!("bad timestamp in '{stem}'")))?
        .and_utc();

    let title = parts[3..].join("_");

    Ok(ParsedStem {
        stem,
        album,
        album_index,
        title,
        scanned_at,
    })
}

/// Per-run ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files: usize,
    pub scans_created: usize,
    pub documents_created: usize,
    pub documents_skipped: usize,
    pub bad_files: usize,
}

/// Walks batch directories and commits scan/document rows in batches.
#[derive(Clone)]
pub struct Ingestor {
    db: Db,
    batch_name: String,
    cdn_url: String,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(db: Db, batch_name: impl Into<String>, cdn_url: impl Into<String>,
               batch_size: usize) -> Self {
        Self {
            db,
            batch_name: batch_name.into(),
            cdn_url: cdn_url.into(),
            batch_size,
        }
    }

    /// Ingest every `*.json` file under one album directory, in natural-sort
    /// order so `album_index` sequences commit ascending.
    pub fn ingest_album(&self, album_dir: &Path, cancel: &CancellationToken) -> Result<IngestStats> {
        if !album_dir.is_dir() {
            return Err(Error::bad_input(format!(
                "not a directory: {}",
                album_dir.display()
            )));
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(album_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort_by(|a, b| {
            natural_cmp(
                a.file_name().and_then(|s| s.to_str()).unwrap_or_default(),
                b.file_name().and_then(|s| s.to_str()).unwrap_or_default(),
            )
        });

        info!("loading {} documents from {}", files.len(), album_dir.display());
        self.ingest_files(&files, cancel)
    }

    /// Ingest an explicit list of file paths. Bad filenames are counted,
    /// logged, and skipped; they never abort the batch. Commits land every
    /// `batch_size` files and on the final file.
    pub fn ingest_files(
        &self,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<IngestStats> {
        let total = files.len();
        // The whole batch re-runs on a transient commit failure; skipping
        // already-present rows makes that replay safe.
        self.db.with_session(|session| {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let mut stats = IngestStats::default();
            session.begin()?;
            for (i, file) in files.iter().enumerate() {
                stats.files += 1;
                match self.ingest_file(session.conn(), file) {
                    Ok(outcome) => {
                        if outcome.scan_created {
                            stats.scans_created += 1;
                        }
                        if outcome.document_created {
                            stats.documents_created += 1;
                        } else {
                            stats.documents_skipped += 1;
                        }
                    }
                    Err(Error::BadInput(msg)) => {
                        warn!("skipping {}: {msg}", file.display());
                        stats.bad_files += 1;
                    }
                    Err(e) => return Err(e),
                }

                if on_batch_boundary(i, total, self.batch_size) {
                    session.commit()?;
                    info!("importing documents ({}/{total})", i + 1);
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    session.begin()?;
                }
            }
            session.commit()?;
            Ok(stats)
        })
    }

    fn ingest_file(&self, conn: &rusqlite::Connection, path: &Path) -> Result<FileOutcome> {
        let parsed = parse_scan_filename(path)?;
        let ParsedStem {
            stem,
            album,
            album_index,
            title,
            scanned_at,
        } = parsed;

        let (scan, scan_created) =
            match Scan::get_by_album_and_stem(conn, &album, &stem)? {
                Some(scan) => (scan, false),
                None => {
                    let image_path = format!("img/{album}/{stem}.webp");
                    let scan = Scan {
                        meta: RecordMeta::new(),
                        stem: stem.clone(),
                        album: album.clone(),
                        album_index,
                        title,
                        url: format!("{}/{image_path}", self.cdn_url),
                        thumb_url: format!("{}/thumbs/{album}/{stem}.webp", self.cdn_url),
                        path: image_path,
                        scanned_at,
                        media_archive: None,
                        media_collection: None,
                        media_box: None,
                        media_folder: None,
                        media_type: None,
                        media_created_at: crate::helpers::epoch(),
                    };
                    scan.insert(conn)?;
                    debug!("created scan <{}> for {album}/{stem}", scan.meta.guid);
                    (scan, true)
                }
            };

        let json_path = format!("{}/json/{album}/{stem}.json", self.batch_name);
        if Document::exists(conn, &scan.meta.guid, &self.batch_name, &json_path)? {
            debug!("document for {album}/{stem} already ingested in batch {}",
                   self.batch_name);
            return Ok(FileOutcome {
                scan_created,
                document_created: false,
            });
        }

        let text_path = format!("{}/text/{album}/{stem}.txt", self.batch_name);
        let document = Document {
            meta: RecordMeta::new(),
            scan_guid: scan.meta.guid.clone(),
            batch_name: self.batch_name.clone(),
            json_url: format!("{}/{json_path}", self.cdn_url),
            text_url: format!("{}/{text_path}", self.cdn_url),
            json_path,
            text_path,
        };
        document.insert(conn)?;
        Ok(FileOutcome {
            scan_created,
            document_created: true,
        })
    }
}

struct FileOutcome {
    scan_created: bool,
    document_created: bool,
}
