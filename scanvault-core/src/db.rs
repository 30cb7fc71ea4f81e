//! SQLite storage substrate: session management, the global write-latch, and
//! transient-error retry with jittered backoff.
//!
//! SQLite services one writer at a time. Every commit and rollback happens
//! under a process-wide latch so parallel ingestion tasks never trip over
//! "database is locked" mid-commit; readers open their own WAL connections
//! and never take the latch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scans (
    guid             TEXT PRIMARY KEY,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    tags             TEXT NOT NULL DEFAULT '',
    comment          TEXT NOT NULL DEFAULT '',
    stem             TEXT NOT NULL,
    album            TEXT NOT NULL,
    album_index      INTEGER NOT NULL,
    title            TEXT NOT NULL,
    path             TEXT NOT NULL,
    url              TEXT NOT NULL,
    thumb_url        TEXT NOT NULL,
    scanned_at       TEXT NOT NULL,
    media_archive    TEXT,
    media_collection TEXT,
    media_box        TEXT,
    media_folder     TEXT,
    media_type       TEXT,
    media_created_at TEXT,
    UNIQUE (album, album_index)
);

CREATE TABLE IF NOT EXISTS documents (
    guid       TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    tags       TEXT NOT NULL DEFAULT '',
    comment    TEXT NOT NULL DEFAULT '',
    scan_guid  TEXT NOT NULL REFERENCES scans (guid) ON DELETE CASCADE,
    batch_name TEXT NOT NULL,
    json_path  TEXT NOT NULL,
    json_url   TEXT NOT NULL,
    text_path  TEXT NOT NULL,
    text_url   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_scan ON documents (scan_guid);
CREATE INDEX IF NOT EXISTS idx_documents_created ON documents (created_at);

CREATE TABLE IF NOT EXISTS corpuses (
    guid           TEXT PRIMARY KEY,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    tags           TEXT NOT NULL DEFAULT '',
    comment        TEXT NOT NULL DEFAULT '',
    checksum       TEXT NOT NULL,
    document_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS corpus_documents (
    corpus_guid   TEXT NOT NULL REFERENCES corpuses (guid) ON DELETE CASCADE,
    document_guid TEXT NOT NULL REFERENCES documents (guid) ON DELETE CASCADE,
    PRIMARY KEY (corpus_guid, document_guid)
);

CREATE TABLE IF NOT EXISTS searches (
    guid        TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    tags        TEXT NOT NULL DEFAULT '',
    comment     TEXT NOT NULL DEFAULT '',
    status      TEXT NOT NULL DEFAULT 'PENDING',
    search_str  TEXT NOT NULL,
    corpus_guid TEXT NOT NULL REFERENCES corpuses (guid) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS search_documents (
    search_guid   TEXT NOT NULL REFERENCES searches (guid) ON DELETE CASCADE,
    document_guid TEXT NOT NULL REFERENCES documents (guid) ON DELETE CASCADE,
    PRIMARY KEY (search_guid, document_guid)
);

CREATE TABLE IF NOT EXISTS megadocs (
    guid        TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    tags        TEXT NOT NULL DEFAULT '',
    comment     TEXT NOT NULL DEFAULT '',
    status      TEXT NOT NULL DEFAULT 'PENDING',
    search_guid TEXT NOT NULL REFERENCES searches (guid) ON DELETE CASCADE,
    filetype    TEXT NOT NULL,
    filename    TEXT NOT NULL,
    path        TEXT NOT NULL,
    url         TEXT NOT NULL,
    progress    REAL NOT NULL DEFAULT 0.0,
    UNIQUE (search_guid, filetype)
);
";

/// Handle to the SQLite database. Cheap to clone; sessions open their own
/// connections against the shared path and share the write-latch.
#[derive(Clone)]
pub struct Db {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    retries: u32,
}

impl Db {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl Into<PathBuf>, retries: u32) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
            retries,
        };

        debug!("initializing database at {}", db.path.display());
        let session = db.session()?;
        session.conn().execute_batch(SCHEMA)?;
        Ok(db)
    }

    /// Path to the underlying SQLite file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new unit-of-work against the database.
    pub fn session(&self) -> Result<Session> {
        Session::open(&self.path, self.write_lock.clone())
    }

    /// Run `op` in its own session, retrying transient errors with
    /// `attempt² + jitter` backoff up to the configured retry budget.
    ///
    /// Any open transaction is rolled back (under the latch) before the next
    /// attempt. Non-transient errors propagate immediately; exhaustion yields
    /// a fatal error carrying the last cause.
    pub fn with_session<T>(&self, mut op: impl FnMut(&mut Session) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut session = self.session()?;
            match op(&mut session) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if session.in_transaction() {
                        warn!("rolling back database session: {e}");
                        let _ = session.rollback();
                    }
                    if !e.is_transient() {
                        return Err(e);
                    }
                    if attempt > self.retries {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    let delay = (attempt * attempt) as f64 + fastrand::f64();
                    warn!(
                        "transient error in database operation, retrying in {delay:.2} \
                         seconds (attempt {attempt} of {}): {e}",
                        self.retries
                    );
                    std::thread::sleep(Duration::from_secs_f64(delay));
                }
            }
        }
    }

    /// Run a read-only `op`; no transaction, no latch.
    pub fn read<T>(&self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.with_session(|session| op(session.conn()))
    }

    /// Run `op` inside a transaction committed at the end of the call.
    pub fn write<T>(&self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.with_session(|session| {
            session.begin()?;
            let value = op(session.conn())?;
            session.commit()?;
            Ok(value)
        })
    }
}

/// A unit-of-work: one connection with explicit begin/commit/rollback.
///
/// Helpers either participate in a caller's session (taking `&Connection`)
/// or open, commit, and close their own via [`Db::write`]. Dropping a
/// session with an open transaction rolls it back.
pub struct Session {
    conn: Connection,
    write_lock: Arc<Mutex<()>>,
    in_tx: bool,
}

impl Session {
    fn open(path: &Path, write_lock: Arc<Mutex<()>>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 1000;",
        )?;
        Ok(Self {
            conn,
            write_lock,
            in_tx: false,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    /// Begin a transaction. No-op when one is already open so helpers can
    /// participate in a larger unit-of-work.
    pub fn begin(&mut self) -> Result<()> {
        if !self.in_tx {
            self.conn.execute_batch("BEGIN")?;
            self.in_tx = true;
        }
        Ok(())
    }

    /// Commit the open transaction under the global write-latch.
    pub fn commit(&mut self) -> Result<()> {
        if self.in_tx {
            let _guard = self.write_lock.lock();
            debug!("committing database session");
            self.conn.execute_batch("COMMIT")?;
            self.in_tx = false;
        }
        Ok(())
    }

    /// Roll back the open transaction under the global write-latch.
    pub fn rollback(&mut self) -> Result<()> {
        if self.in_tx {
            let _guard = self.write_lock.lock();
            debug!("rolling back database session");
            self.conn.execute_batch("ROLLBACK")?;
            self.in_tx = false;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.in_tx {
            let _ = self.rollback();
        }
    }
}
