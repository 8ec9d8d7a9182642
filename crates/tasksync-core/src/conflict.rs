//! Last-write-wins conflict resolution.
//!
//! Two versions of the same record are compared by `updated_at` only; the
//! local version wins ties. There is no field-level merge and no detection
//! of concurrent offline edits from two devices: one of them is lost.

use chrono::{DateTime, Utc};

use crate::models::{CompletionRecord, ProfileRecord, TaskRecord};

/// A record carrying the timestamp used for conflict resolution.
pub trait Versioned {
    fn updated_at(&self) -> DateTime<Utc>;
}

impl Versioned for TaskRecord {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Versioned for ProfileRecord {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Versioned for CompletionRecord {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
}

/// Pick the winner between a local and a remote version of one record.
pub fn resolve<T: Versioned>(local: &T, remote: &T) -> Resolution {
    if local.updated_at() >= remote.updated_at() {
        Resolution::KeepLocal
    } else {
        Resolution::TakeRemote
    }
}

/// What a pull should do when one or both sides may be missing.
/// Returns the remote value to adopt, if any.
pub fn pull_winner<'a, T: Versioned>(local: Option<&T>, remote: Option<&'a T>) -> Option<&'a T> {
    match (local, remote) {
        (_, None) => None,
        (None, Some(remote)) => Some(remote),
        (Some(local), Some(remote)) => match resolve(local, remote) {
            Resolution::KeepLocal => None,
            Resolution::TakeRemote => Some(remote),
        },
    }
}

/// What a push should do when one or both sides may be missing.
/// Returns the local value to upload, if any. Equal timestamps mean the
/// remote already holds this version, so nothing is uploaded.
pub fn push_winner<'a, T: Versioned>(local: Option<&'a T>, remote: Option<&T>) -> Option<&'a T> {
    match (local, remote) {
        (None, _) => None,
        (Some(local), None) => Some(local),
        (Some(local), Some(remote)) => {
            (local.updated_at() > remote.updated_at()).then_some(local)
        }
    }
}
