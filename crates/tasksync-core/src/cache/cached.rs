use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// A value stamped with the time it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T, cached_at: DateTime<Utc>) -> Self {
        Self { data, cached_at }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_minutes()
    }

    /// Coarse age for display, rounded to the nearest unit.
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        match self.age_minutes(now) {
            // negative ages come from clock skew
            m if m < 1 => "just now".to_string(),
            m if m < 60 => format!("{}m ago", m),
            m if m < 24 * 60 => format!("{}h ago", (m + 30) / 60),
            m => format!("{}d ago", (m + 12 * 60) / (24 * 60)),
        }
    }

    /// Older than `retention` as of `now`.
    pub fn is_stale(&self, retention: Months, now: DateTime<Utc>) -> bool {
        match self.cached_at.checked_add_months(retention) {
            Some(expires) => now > expires,
            None => false,
        }
    }
}
