use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::date_key::DateKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Fitness,
    Diet,
    Other,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Fitness => "fitness",
            TaskCategory::Diet => "diet",
            TaskCategory::Other => "other",
        }
    }

    /// Parse a category tag; unknown tags fall back to `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "fitness" | "workout" | "exercise" => TaskCategory::Fitness,
            "diet" | "meal" | "nutrition" => TaskCategory::Diet,
            _ => TaskCategory::Other,
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ExerciseEntry {
    pub name: String,
    pub sets: Option<u32>,
    pub reps: Option<u32>,
    pub duration_minutes: Option<f64>,
    pub calories: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FoodItem {
    pub name: String,
    pub portion: Option<String>,
    pub calories: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
}

/// Structured sub-entries attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum TaskDetails {
    Workout(Vec<ExerciseEntry>),
    Meal(Vec<FoodItem>),
}

impl TaskDetails {
    pub fn total_calories(&self) -> f64 {
        match self {
            TaskDetails::Workout(entries) => entries.iter().filter_map(|e| e.calories).sum(),
            TaskDetails::Meal(items) => items.iter().filter_map(|i| i.calories).sum(),
        }
    }
}

/// A scheduled task for one day.
///
/// `id` is stable across the cache, the local store and the remote store.
/// `updated_at` only moves forward and is the sole input to conflict
/// resolution. Edits produce a new value through [`TaskPatch::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub time: NaiveTime,
    pub date: NaiveDate,
    pub category: TaskCategory,
    pub is_done: bool,
    // Presentation only
    pub icon: Option<String>,
    pub accent_color: Option<String>,
    pub details: Option<TaskDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_ai_generated: bool,
    pub source: Option<String>,
}

impl TaskRecord {
    pub fn date_key(&self) -> DateKey {
        DateKey::from_date(self.date)
    }

    /// Ordering used inside a day slice: scheduled time, then creation.
    pub fn schedule_cmp(&self, other: &TaskRecord) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Copy of this record marked done/undone at `now`.
    pub fn with_done(&self, is_done: bool, now: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            is_done,
            updated_at: bump(self.updated_at, now),
            ..self.clone()
        }
    }
}

/// Input for creating a task. The id and timestamps are assigned on create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TaskDraft {
    pub title: String,
    pub subtitle: Option<String>,
    pub time: NaiveTime,
    pub date: NaiveDate,
    pub category: TaskCategory,
    #[serde(default)]
    pub details: Option<TaskDetails>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub accent_color: Option<String>,
    #[serde(default)]
    pub is_ai_generated: bool,
    #[serde(default)]
    pub source: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, date: NaiveDate, time: NaiveTime, category: TaskCategory) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            time,
            date,
            category,
            details: None,
            icon: None,
            accent_color: None,
            is_ai_generated: false,
            source: None,
        }
    }

    pub fn into_record(self, id: String, now: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            id,
            title: self.title,
            subtitle: self.subtitle,
            time: self.time,
            date: self.date,
            category: self.category,
            is_done: false,
            icon: self.icon,
            accent_color: self.accent_color,
            details: self.details,
            created_at: now,
            updated_at: now,
            is_ai_generated: self.is_ai_generated,
            source: self.source,
        }
    }
}

/// Field-level changes for an existing task. Absent fields are left as-is;
/// `subtitle: Some(None)` clears the subtitle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TaskPatch {
    pub title: Option<String>,
    pub subtitle: Option<Option<String>>,
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub category: Option<TaskCategory>,
    pub is_done: Option<bool>,
    pub details: Option<Option<TaskDetails>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// New record value with the patch applied and `updated_at` advanced.
    pub fn apply(&self, record: &TaskRecord, now: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            id: record.id.clone(),
            title: self.title.clone().unwrap_or_else(|| record.title.clone()),
            subtitle: self.subtitle.clone().unwrap_or_else(|| record.subtitle.clone()),
            time: self.time.unwrap_or(record.time),
            date: self.date.unwrap_or(record.date),
            category: self.category.unwrap_or(record.category),
            is_done: self.is_done.unwrap_or(record.is_done),
            icon: record.icon.clone(),
            accent_color: record.accent_color.clone(),
            details: self.details.clone().unwrap_or_else(|| record.details.clone()),
            created_at: record.created_at,
            updated_at: bump(record.updated_at, now),
            is_ai_generated: record.is_ai_generated,
            source: record.source.clone(),
        }
    }
}

/// Keep `updated_at` monotonic even if the wall clock stepped backwards.
fn bump(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(now: DateTime<Utc>) -> TaskRecord {
        TaskDraft::new(
            "Morning run",
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            TaskCategory::Fitness,
        )
        .into_record("t1".to_string(), now)
    }

    #[test]
    fn test_category_from_tag() {
        assert_eq!(TaskCategory::from_tag("Fitness"), TaskCategory::Fitness);
        assert_eq!(TaskCategory::from_tag(" meal "), TaskCategory::Diet);
        assert_eq!(TaskCategory::from_tag("reading"), TaskCategory::Other);
    }

    #[test]
    fn test_patch_produces_new_value() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let task = sample(now);
        let patch = TaskPatch {
            title: Some("Evening run".to_string()),
            is_done: Some(true),
            subtitle: Some(Some("5k".to_string())),
            ..Default::default()
        };
        let later = now + Duration::minutes(5);
        let updated = patch.apply(&task, later);

        assert_eq!(updated.id, task.id);
        assert_eq!(updated.title, "Evening run");
        assert_eq!(updated.subtitle.as_deref(), Some("5k"));
        assert!(updated.is_done);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.created_at, task.created_at);
        // original untouched
        assert_eq!(task.title, "Morning run");
    }

    #[test]
    fn test_updated_at_never_goes_backwards() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let task = sample(now);
        let earlier = now - Duration::hours(1);
        let updated = task.with_done(true, earlier);
        assert!(updated.updated_at > task.updated_at);
    }

    #[test]
    fn test_empty_patch() {
        assert!(TaskPatch::default().is_empty());
        let patch = TaskPatch {
            is_done: Some(false),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_details_calories() {
        let details = TaskDetails::Meal(vec![
            FoodItem {
                name: "Oats".into(),
                portion: Some("1 cup".into()),
                calories: Some(300.0),
                protein_g: Some(10.0),
                carbs_g: Some(54.0),
                fat_g: Some(5.0),
            },
            FoodItem {
                name: "Coffee".into(),
                portion: None,
                calories: None,
                protein_g: None,
                carbs_g: None,
                fat_g: None,
            },
        ]);
        assert_eq!(details.total_calories(), 300.0);
    }
}
