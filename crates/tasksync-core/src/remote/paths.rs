//! Remote path scheme.
//!
//! ```text
//! users/{userId}/profile
//! users/{userId}/tasks/{dateKey}/{taskId}
//! users/{userId}/dailyCompletions/{dateKey}
//! ```

use crate::date_key::DateKey;
use crate::error::{Result, SyncError};

pub fn profile(user_id: &str) -> String {
    format!("users/{}/profile", user_id)
}

pub fn tasks_root(user_id: &str) -> String {
    format!("users/{}/tasks", user_id)
}

pub fn tasks_for_day(user_id: &str, date_key: DateKey) -> String {
    format!("users/{}/tasks/{}", user_id, date_key)
}

pub fn task(user_id: &str, date_key: DateKey, task_id: &str) -> String {
    format!("users/{}/tasks/{}/{}", user_id, date_key, task_id)
}

pub fn completions_root(user_id: &str) -> String {
    format!("users/{}/dailyCompletions", user_id)
}

pub fn completion(user_id: &str, date_key: DateKey) -> String {
    format!("users/{}/dailyCompletions/{}", user_id, date_key)
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Reject ids that would break out of their path segment.
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    let forbidden = ['/', '.', '#', '$', '[', ']'];
    if value.is_empty() || value.chars().any(|c| forbidden.contains(&c) || c.is_control()) {
        return Err(SyncError::InvalidFormat(format!(
            "{} '{}' is not a valid path segment",
            kind, value
        )));
    }
    Ok(())
}
