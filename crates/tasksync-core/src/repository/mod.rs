//! Per-entity repositories.
//!
//! Each repository mediates between the [`LocalStore`] and a
//! [`RemoteStore`]: direct CRUD for the UI and assistant layers (writes go
//! to the local store first, then to the remote under the dedup guard) and
//! `sync_from_cloud` / `sync_to_cloud` for the orchestrator. Conflicts are
//! settled with last-write-wins, see [`crate::conflict`].

pub mod completion;
pub mod profile;
pub mod task;

use std::ops::AddAssign;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::clock::{Calendar, Clock};
use crate::date_key::DateKey;
use crate::dedup::OperationDedupGuard;
use crate::error::Result;
use crate::local::LocalStore;
use crate::remote::RemoteStore;

pub use completion::CompletionRepository;
pub use profile::ProfileRepository;
pub use task::TaskRepository;

/// Collaborators shared by every repository.
#[derive(Clone)]
pub struct RepoContext {
    pub local: Arc<LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub dedup: Arc<OperationDedupGuard>,
    pub clock: Arc<dyn Clock>,
    pub calendar: Calendar,
}

impl RepoContext {
    /// Current time at the millisecond precision the wire format keeps, so
    /// a value read back from the remote compares equal to what was written.
    pub fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }
}

/// Inclusive range of days a sync phase looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRange {
    pub start: DateKey,
    pub end: DateKey,
}

impl SyncRange {
    pub fn new(start: DateKey, end: DateKey) -> Self {
        Self { start, end }
    }

    /// `days` back from `today` through `end`.
    pub fn trailing(today: NaiveDate, days: i64, end: DateKey) -> Self {
        Self {
            start: DateKey::from_date(today - Duration::days(days)),
            end,
        }
    }

    pub fn contains(&self, key: DateKey) -> bool {
        key >= self.start && key <= self.end
    }
}

/// Record counts of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn pulled(count: usize) -> Self {
        Self {
            pulled: count,
            ..Self::default()
        }
    }

    pub fn pushed(count: usize) -> Self {
        Self {
            pushed: count,
            ..Self::default()
        }
    }
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.pulled += other.pulled;
        self.pushed += other.pushed;
        self.deleted += other.deleted;
    }
}

/// The pull/push half of a repository, as driven by the orchestrator.
#[async_trait]
pub trait EntitySync: Send + Sync {
    /// Short name used in logs ("profile", "tasks", ...).
    fn entity(&self) -> &'static str;

    /// Bring remote changes within `range` into the local store.
    async fn sync_from_cloud(&self, user_id: &str, range: SyncRange) -> Result<SyncReport>;

    /// Upload local changes within `range` that the remote does not have.
    async fn sync_to_cloud(&self, user_id: &str, range: SyncRange) -> Result<SyncReport>;
}
