//! Error types for the scanvault crates.

use thiserror::Error;

/// Result type alias using scanvault's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scanvault pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed filename, too-short search string, missing required field
    #[error("bad input: {0}")]
    BadInput(String),

    /// GUID lookup miss or file absent
    #[error("not found: {0}")]
    NotFound(String),

    /// An exclusive pipeline phase holds the latch
    #[error("pipeline busy: {0}")]
    Busy(&'static str),

    /// A search was requested before any corpus snapshot exists
    #[error("no corpus available")]
    NoCorpus,

    /// The full-text index references a document the database does not know
    #[error("document <{guid}> referenced in index does not exist in database; \
             index is out of sync and must be rebuilt")]
    IndexOutOfSync { guid: String },

    /// Unsupported megadoc filetype
    #[error("unsupported megadoc filetype: {0}")]
    NotImplemented(String),

    /// A transient operation failed even after exhausting its retry budget
    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Upload retry budget exhausted
    #[error("upload of megadoc <{guid}> failed after {attempts} attempts: {cause}")]
    UploadFailed {
        guid: String,
        attempts: u32,
        cause: String,
    },

    /// Object-store call failed (single attempt)
    #[error("object store error: {0}")]
    Upload(String),

    /// The orchestrator cancelled the task
    #[error("task cancelled")]
    Cancelled,

    /// Status value outside an entity's lifecycle
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Configuration file missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("full-text index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("docx error: {0}")]
    Docx(#[from] docx_rs::DocxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a new bad-input error
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Check if this error is transient and worth retrying.
    ///
    /// Lock contention and timeouts clear on their own; everything else
    /// propagates immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            Self::Upload(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_transient() {
        let err = Error::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn bad_input_is_not_transient() {
        assert!(!Error::bad_input("nope").is_transient());
        assert!(!Error::NoCorpus.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn retries_exhausted_carries_cause() {
        let err = Error::RetriesExhausted {
            attempts: 10,
            source: Box::new(Error::bad_input("inner")),
        };
        assert!(err.to_string().contains("10 attempts"));
        assert!(err.to_string().contains("inner"));
    }
}
