//! Collapses duplicate in-flight writes.
//!
//! UI actions and listener echoes can trigger the same save at the same
//! time. Each logical write is keyed by `(userId, dateKey, recordId)`; the
//! first caller to `begin` owns it until `end`, and concurrent callers are
//! told to skip and report success.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::date_key::DateKey;

/// Identity of one logical write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpKey {
    pub user_id: String,
    pub scope: String,
    pub record_id: String,
}

impl OpKey {
    pub fn new(user_id: impl Into<String>, date_key: DateKey, record_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope: date_key.to_string(),
            record_id: record_id.into(),
        }
    }

    /// Key for records that are not tied to a day, such as the profile.
    pub fn undated(user_id: impl Into<String>, scope: &str, record_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope: scope.to_string(),
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.scope, self.record_id)
    }
}

#[derive(Debug, Default)]
pub struct OperationDedupGuard {
    in_flight: Mutex<HashSet<OpKey>>,
}

impl OperationDedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<OpKey>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `key`. False means another caller already owns it.
    pub fn begin(&self, key: &OpKey) -> bool {
        let claimed = self.set().insert(key.clone());
        if !claimed {
            debug!(op = %key, "Duplicate operation in flight, skipping");
        }
        claimed
    }

    /// Release `key`.
    pub fn end(&self, key: &OpKey) {
        self.set().remove(key);
    }

    pub fn is_in_flight(&self, key: &OpKey) -> bool {
        self.set().contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.set().len()
    }

    /// Claim `key` and release it when the returned permit drops, so the
    /// key is freed on success, error and early return alike.
    pub fn acquire(self: &Arc<Self>, key: OpKey) -> Option<OpPermit> {
        if self.begin(&key) {
            Some(OpPermit {
                guard: Arc::clone(self),
                key,
            })
        } else {
            None
        }
    }
}

/// Ownership of an in-flight operation; releases the key on drop.
#[derive(Debug)]
pub struct OpPermit {
    guard: Arc<OperationDedupGuard>,
    key: OpKey,
}

impl OpPermit {
    pub fn key(&self) -> &OpKey {
        &self.key
    }
}

impl Drop for OpPermit {
    fn drop(&mut self) {
        self.guard.end(&self.key);
    }
}
