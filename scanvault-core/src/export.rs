//! Megadoc generation: one composite artifact per (search, filetype),
//! concatenating per-document sections in document order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use docx_rs::{BreakType, Docx, Hyperlink, HyperlinkType, Paragraph, Run};
use slugify::slugify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::Db;
use crate::error::{Error, Result};
use crate::helpers::{compact_timestamp, utc_now};
use crate::model::{Megadoc, Scan, Search, Status, FILETYPES};

/// Human-readable section date, e.g. `September 27, 2022 at 1:12 PM`.
fn section_date(dt: &DateTime<Utc>) -> String {
    dt.format("%B %d, %Y at %-I:%M %p").to_string()
}

/// Builds megadoc artifacts under `data_path` from search results.
#[derive(Clone)]
pub struct MegadocBuilder {
    db: Db,
    data_path: PathBuf,
    /// Relative directory megadocs land in, e.g. `00/megadocs`.
    megadoc_path: PathBuf,
    cdn_url: String,
}

impl MegadocBuilder {
    pub fn new(
        db: Db,
        data_path: impl Into<PathBuf>,
        megadoc_path: impl Into<PathBuf>,
        cdn_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            data_path: data_path.into(),
            megadoc_path: megadoc_path.into(),
            cdn_url: cdn_url.into(),
        }
    }

    /// Build the megadoc of `filetype` for a search.
    ///
    /// Returns the existing megadoc unchanged when one of this filetype
    /// already exists, and `None` when the search has no results (no row is
    /// created). Unsupported filetypes fail with not-implemented before any
    /// row exists.
    pub fn build(
        &self,
        search_guid: &str,
        filetype: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Megadoc>> {
        let filetype = filetype.to_lowercase();
        if !FILETYPES.contains(&filetype.as_str()) {
            return Err(Error::NotImplemented(filetype));
        }

        let search = self
            .db
            .read(|conn| Search::get(conn, search_guid))?
            .ok_or_else(|| Error::not_found(format!("search <{search_guid}>")))?;

        let documents = self.db.read(|conn| search.documents(conn))?;
        if documents.is_empty() {
            warn!(
                "skipping search '{}' <{}>, no results",
                search.search_str, search.meta.guid
            );
            return Ok(None);
        }

        if let Some(existing) = self
            .db
            .read(|conn| Megadoc::get_by_search_and_type(conn, search_guid, &filetype))?
        {
            warn!(
                "search '{}' <{}> already has a {filetype} megadoc <{}>",
                search.search_str, search.meta.guid, existing.meta.guid
            );
            return Ok(Some(existing));
        }

        info!(
            "creating {filetype} megadoc for search '{}' <{}>",
            search.search_str, search.meta.guid
        );
        let filename = format!(
            "{}_{}{filetype}",
            slugify!(&search.search_str),
            compact_timestamp(&utc_now())
        );
        let rel_path = format!("{}/{filename}", self.megadoc_path.display());
        let url = format!("{}/{rel_path}", self.cdn_url);
        let mut megadoc = self.db.write(|conn| {
            Megadoc::create(
                conn,
                search_guid,
                &filetype,
                filename.clone(),
                rel_path.clone(),
                url.clone(),
            )
        })?;

        let abs_path = self.data_path.join(&megadoc.path);
        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if abs_path.exists() {
            warn!("megadoc file already exists, could be error: {}", abs_path.display());
            std::fs::remove_file(&abs_path)?;
        }

        let mut writer = SectionWriter::new(&filetype, &abs_path);
        let total = documents.len();
        for (i, document) in documents.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let scan = self.db.read(|conn| document.scan(conn))?;
            let text = document.get_text(&self.data_path);
            let is_last = i + 1 == total;
            writer.append(&scan, &text, is_last)?;

            self.db.write(|conn| {
                if megadoc.status == Status::Pending {
                    megadoc.set_status(conn, Status::Started)?;
                }
                megadoc.set_progress(conn, (i + 1) as f64 / total as f64 * 100.0)
            })?;
        }
        writer.finish()?;

        self.db.write(|conn| {
            megadoc.set_progress(conn, 100.0)?;
            megadoc.set_status(conn, Status::Sending)
        })?;
        info!(
            "done creating megadoc <{}> of type {filetype} for search '{}' <{}>",
            megadoc.meta.guid, search.search_str, search.meta.guid
        );
        Ok(Some(megadoc))
    }
}

/// Per-filetype section sink. Markdown-style artifacts stream straight to
/// disk; docx accumulates and packs once at the end.
enum SectionWriter {
    Markdown { path: PathBuf },
    Docx { path: PathBuf, docx: Option<Docx> },
}

impl SectionWriter {
    fn new(filetype: &str, path: &Path) -> Self {
        match filetype {
            ".docx" => Self::Docx {
                path: path.to_path_buf(),
                docx: Some(Docx::new()),
            },
            _ => Self::Markdown {
                path: path.to_path_buf(),
            },
        }
    }

    fn append(&mut self, scan: &Scan, text: &str, is_last: bool) -> Result<()> {
        match self {
            Self::Markdown { path } => {
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                let separator = if is_last { "" } else { "\n\n\n" };
                write!(
                    file,
                    "---\n\
                     date: {}\n\
                     album: {} - {} of {}\n\
                     image: {}\n\
                     ---\n\
                     \n\
                     {text}\n{separator}",
                    section_date(&scan.scanned_at),
                    scan.title,
                    scan.album_index,
                    scan.album,
                    scan.url,
                )?;
                Ok(())
            }
            Self::Docx { docx, .. } => {
                let mut doc = docx.take().unwrap_or_default();
                doc = doc.add_paragraph(
                    Paragraph::new()
                        .style("Heading1")
                        .add_run(Run::new().add_text(section_date(&scan.scanned_at))),
                );
                doc = doc.add_paragraph(Paragraph::new().add_run(
                    Run::new()
                        .add_text(format!(
                            "{} - {} of {}",
                            scan.title, scan.album_index, scan.album
                        ))
                        .bold(),
                ));
                doc = doc.add_paragraph(
                    Paragraph::new().add_hyperlink(
                        Hyperlink::new(scan.url.as_str(), HyperlinkType::External).add_run(
                            Run::new()
                                .add_text(scan.url.as_str())
                                .bold()
                                .underline("single")
                                .color("0000FF"),
                        ),
                    ),
                );
                doc = doc.add_paragraph(Paragraph::new().add_run(Run::new().add_text("-----")));
                doc = doc.add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)));
                if !is_last {
                    doc = doc.add_paragraph(
                        Paragraph::new().add_run(Run::new().add_break(BreakType::Page)),
                    );
                }
                *docx = Some(doc);
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            Self::Markdown { .. } => Ok(()),
            Self::Docx { path, docx } => {
                let file = std::fs::File::create(path)?;
                if let Some(doc) = docx {
                    doc.build().pack(file)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::index::Indexer;
    use crate::ingest::Ingestor;
    use crate::search::Searcher;
    use chrono::TimeZone;

    fn seed_search(root: &Path, texts: &[&str]) -> (Db, Search) {
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
        let search = Searcher::new(db.clone(), root.join("data/00/index"))
            .run("Hello")
            .expect("search");
        (db, search)
    }

    fn builder(root: &Path, db: &Db) -> MegadocBuilder {
        MegadocBuilder::new(
            db.clone(),
            root.join("data"),
            "00/megadocs",
            "https://cdn.test",
        )
    }

    #[test]
    fn section_date_is_human_readable() {
        let dt = Utc
            .with_ymd_and_hms(2022, 9, 27, 13, 12, 42)
            .single()
            .expect("valid date");
        assert_eq!(section_date(&dt), "September 27, 2022 at 1:12 PM");
    }

    #[test]
    fn txt_megadoc_has_ordered_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, search) = seed_search(
            dir.path(),
            &[
                "Hello from Document #1",
                "Hello from Document #2",
                "Hello from Document #3",
            ],
        );
        let megadoc = builder(dir.path(), &db)
            .build(&search.meta.guid, ".txt", &CancellationToken::new())
            .expect("build")
            .expect("some");

        assert_eq!(megadoc.status, Status::Sending);
        assert_eq!(megadoc.progress, 100.0);
        assert!(megadoc.filename.starts_with("hello_"));
        assert!(megadoc.filename.ends_with(".txt"));

        let content = std::fs::read_to_string(dir.path().join("data").join(&megadoc.path))
            .expect("read");
        let first = content.find("Hello from Document #1").expect("first");
        let second = content.find("Hello from Document #2").expect("second");
        let third = content.find("Hello from Document #3").expect("third");
        assert!(first < second && second < third);
        assert_eq!(content.matches("---\ndate:").count(), 3);
        assert!(content.contains("album: image_5990 - 1 of 2022-09"));
        assert!(content.contains("image: https://cdn.test/img/2022-09/"));
        // three blank lines between sections, none after the last
        assert!(content.contains("#1\n\n\n\n---"));
        assert!(content.ends_with("#3\n"));
    }

    #[test]
    fn second_build_returns_same_megadoc() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, search) = seed_search(dir.path(), &["Hello from Document #1"]);
        let builder = builder(dir.path(), &db);
        let cancel = CancellationToken::new();

        let first = builder
            .build(&search.meta.guid, ".txt", &cancel)
            .expect("first")
            .expect("some");
        let modified_before = std::fs::metadata(dir.path().join("data").join(&first.path))
            .and_then(|m| m.modified())
            .expect("mtime");

        let second = builder
            .build(&search.meta.guid, ".txt", &cancel)
            .expect("second")
            .expect("some");
        assert_eq!(first.meta.guid, second.meta.guid);

        let modified_after = std::fs::metadata(dir.path().join("data").join(&first.path))
            .and_then(|m| m.modified())
            .expect("mtime");
        assert_eq!(modified_before, modified_after);
    }

    #[test]
    fn empty_search_builds_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, _search) = seed_search(dir.path(), &["Hello from Document #1"]);
        let empty = Searcher::new(db.clone(), dir.path().join("data/00/index"))
            .run("unmatched")
            .expect("search");

        let result = builder(dir.path(), &db)
            .build(&empty.meta.guid, ".txt", &CancellationToken::new())
            .expect("build");
        assert!(result.is_none());
        let total = db
            .read(|conn| crate::model::Megadoc::get_total(conn))
            .expect("total");
        assert_eq!(total, 0);
    }

    #[test]
    fn unsupported_filetype_fails_without_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, search) = seed_search(dir.path(), &["Hello from Document #1"]);
        let result = builder(dir.path(), &db).build(
            &search.meta.guid,
            ".pdf",
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::NotImplemented(_))));
        let total = db
            .read(|conn| crate::model::Megadoc::get_total(conn))
            .expect("total");
        assert_eq!(total, 0);
    }

    #[test]
    fn docx_megadoc_is_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, search) = seed_search(
            dir.path(),
            &["Hello from Document #1", "Hello from Document #2"],
        );
        let megadoc = builder(dir.path(), &db)
            .build(&search.meta.guid, ".docx", &CancellationToken::new())
            .expect("build")
            .expect("some");

        assert_eq!(megadoc.status, Status::Sending);
        let file = dir.path().join("data").join(&megadoc.path);
        let size = std::fs::metadata(&file).expect("metadata").len();
        assert!(size > 0);
        assert_eq!(megadoc.filesize(&dir.path().join("data")), size);
    }

    #[test]
    fn md_filetype_uses_front_matter_too() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, search) = seed_search(dir.path(), &["Hello from Document #1"]);
        let megadoc = builder(dir.path(), &db)
            .build(&search.meta.guid, ".md", &CancellationToken::new())
            .expect("build")
            .expect("some");
        assert!(megadoc.filename.ends_with(".md"));
        let content = std::fs::read_to_string(dir.path().join("data").join(&megadoc.path))
            .expect("read");
        assert!(content.starts_with("---\ndate: "));
    }
}
