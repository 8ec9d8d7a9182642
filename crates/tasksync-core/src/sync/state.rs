use std::fmt;

use crate::error::SyncError;
use crate::repository::SyncReport;

/// Lifecycle of the sync orchestrator.
///
/// `Idle -> Syncing -> Completed` on success and `Syncing -> Failed` when a
/// phase fails. `Completed` and `Failed` are left by the next trigger or by
/// an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Completed(SyncReport),
    Failed(SyncError),
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Completed(report) => write!(
                f,
                "completed ({} pulled, {} pushed, {} deleted)",
                report.pulled, report.pushed, report.deleted
            ),
            SyncState::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(SyncState::default().to_string(), "idle");
        let done = SyncState::Completed(SyncReport {
            pulled: 3,
            pushed: 1,
            deleted: 0,
        });
        assert_eq!(done.to_string(), "completed (3 pulled, 1 pushed, 0 deleted)");
        let failed = SyncState::Failed(SyncError::Cancelled);
        assert!(failed.to_string().starts_with("failed: "));
        assert_eq!(failed.error(), Some(&SyncError::Cancelled));
        assert!(SyncState::Syncing.is_syncing());
    }
}
