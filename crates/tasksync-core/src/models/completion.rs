use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::date_key::DateKey;

/// Whether the user finished their plan for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CompletionRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn new(user_id: impl Into<String>, date: NaiveDate, is_completed: bool, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            is_completed,
            completed_at: is_completed.then_some(now),
            updated_at: now,
        }
    }

    pub fn date_key(&self) -> DateKey {
        DateKey::from_date(self.date)
    }
}
