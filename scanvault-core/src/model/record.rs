//! Common record fields and status tracking shared by every entity.
//!
//! Entities embed [`RecordMeta`] rather than inheriting from a base table:
//! GUID, UTC timestamps, and the free-form `tags`/`comment` strings all live
//! here, with [`HasGuid`]/[`HasStatus`] as the seams the pipeline works
//! against.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};
use crate::helpers::{create_guid, utc_now};

/// Common columns present on every entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMeta {
    pub guid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: String,
    pub comment: String,
}

impl RecordMeta {
    pub fn new() -> Self {
        let now = utc_now();
        Self {
            guid: create_guid(),
            created_at: now,
            updated_at: now,
            tags: String::new(),
            comment: String::new(),
        }
    }

    /// Refresh `updated_at`; every mutation path calls this.
    pub fn touch(&mut self) {
        self.updated_at = utc_now();
    }
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Microsecond-resolution RFC 3339 used in storage so lexicographic string
/// ordering matches chronological ordering within a batch.
pub(crate) fn storage_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub trait HasGuid {
    fn guid(&self) -> &str;
}

pub trait HasStatus {
    fn status(&self) -> Status;
}

/// Work status for searches and megadocs.
///
/// - `Pending`: default for all new rows.
/// - `Started`: work has started.
/// - `Sending`: work has finished but results are still being uploaded.
/// - `Success`: work has finished and results are ready.
///
/// Transitions are strictly monotone along this order; anything else is a
/// programming error surfaced as [`Error::IllegalTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Pending,
    Started,
    Sending,
    Success,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Sending => "SENDING",
            Self::Success => "SUCCESS",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "STARTED" => Ok(Self::Started),
            "SENDING" => Ok(Self::Sending),
            "SUCCESS" => Ok(Self::Success),
            other => Err(Error::bad_input(format!("unknown status '{other}'"))),
        }
    }

    /// Whether moving to `next` respects the lifecycle. Re-asserting the
    /// current status is a legal no-op.
    pub fn can_advance_to(self, next: Status) -> bool {
        next >= self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [Status::Pending, Status::Started, Status::Sending, Status::Success] {
            assert_eq!(Status::parse(status.as_str()).expect("parse"), status);
        }
        assert!(Status::parse("FAILURE").is_err());
        assert!(Status::parse("pending").is_err());
    }

    #[test]
    fn transitions_are_monotone() {
        assert!(Status::Pending.can_advance_to(Status::Started));
        assert!(Status::Started.can_advance_to(Status::Success));
        assert!(Status::Sending.can_advance_to(Status::Sending));
        assert!(!Status::Success.can_advance_to(Status::Sending));
        assert!(!Status::Started.can_advance_to(Status::Pending));
    }

    #[test]
    fn new_meta_has_fresh_guid() {
        let a = RecordMeta::new();
        let b = RecordMeta::new();
        assert_eq!(a.guid.len(), 22);
        assert_ne!(a.guid, b.guid);
        assert!(a.tags.is_empty());
    }
}
