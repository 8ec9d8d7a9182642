//! Explicit wire encoding for each entity.
//!
//! Remote values are flat camelCase JSON maps with timestamps as `f64`
//! seconds since the epoch. Every decode names the path it was reading and
//! fails with [`SyncError::Decode`] on a type mismatch instead of dropping
//! the field.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Calendar;
use crate::date_key::DateKey;
use crate::error::{Result, SyncError};
use crate::models::{
    ActivityLevel, CompletionRecord, FitnessGoal, Gender, NutritionTargets, ProfileRecord,
    TaskCategory, TaskDetails, TaskRecord,
};

/// Seconds since the epoch, millisecond precision.
pub fn to_epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp_millis() as f64 / 1000.0
}

pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

mod epoch_seconds {
    use super::*;
    use serde::{de::Error, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(instant: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_f64(to_epoch_seconds(*instant))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(d)?;
        from_epoch_seconds(secs).ok_or_else(|| D::Error::custom(format!("timestamp {} out of range", secs)))
    }
}

mod epoch_seconds_opt {
    use super::*;
    use serde::{de::Error, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(instant: &Option<DateTime<Utc>>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match instant {
            Some(instant) => s.serialize_some(&to_epoch_seconds(*instant)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) => from_epoch_seconds(secs)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp {} out of range", secs))),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    title: String,
    #[serde(default)]
    subtitle: Option<String>,
    /// Scheduled instant (date plus time-of-day in the shared calendar)
    time: f64,
    /// Start of the task's local day
    date: f64,
    category: TaskCategory,
    #[serde(default)]
    is_done: bool,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    details: Option<TaskDetails>,
    #[serde(with = "epoch_seconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "epoch_seconds")]
    updated_at: DateTime<Utc>,
    #[serde(default, rename = "isAIGenerated")]
    is_ai_generated: bool,
    #[serde(default)]
    source: Option<String>,
}

pub fn encode_task(task: &TaskRecord, calendar: &Calendar) -> Result<Value> {
    let day_start = calendar.start_of_day(task.date);
    let scheduled = day_start + (task.time - NaiveTime::default());
    let wire = WireTask {
        id: Some(task.id.clone()),
        title: task.title.clone(),
        subtitle: task.subtitle.clone(),
        time: to_epoch_seconds(scheduled),
        date: to_epoch_seconds(day_start),
        category: task.category,
        is_done: task.is_done,
        icon: task.icon.clone(),
        color: task.accent_color.clone(),
        details: task.details.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        is_ai_generated: task.is_ai_generated,
        source: task.source.clone(),
    };
    serde_json::to_value(wire).map_err(|e| SyncError::encode(format!("task {}", task.id), e))
}

/// Decode one task stored under `path`, whose last segment is the task id.
pub fn decode_task(path: &str, task_id: &str, value: Value, calendar: &Calendar) -> Result<TaskRecord> {
    let wire: WireTask = serde_json::from_value(value).map_err(|e| SyncError::decode(path, e))?;

    if let Some(ref id) = wire.id {
        if id != task_id {
            return Err(SyncError::decode(
                path,
                format!("id field '{}' does not match key '{}'", id, task_id),
            ));
        }
    }

    let date_instant = from_epoch_seconds(wire.date)
        .ok_or_else(|| SyncError::decode(path, format!("date {} out of range", wire.date)))?;
    let time_instant = from_epoch_seconds(wire.time)
        .ok_or_else(|| SyncError::decode(path, format!("time {} out of range", wire.time)))?;

    Ok(TaskRecord {
        id: task_id.to_string(),
        title: wire.title,
        subtitle: wire.subtitle,
        time: time_instant.with_timezone(&calendar.offset()).time(),
        date: calendar.date_of(date_instant),
        category: wire.category,
        is_done: wire.is_done,
        icon: wire.icon,
        accent_color: wire.color,
        details: wire.details,
        created_at: wire.created_at,
        updated_at: wire.updated_at,
        is_ai_generated: wire.is_ai_generated,
        source: wire.source,
    })
}

fn expect_object(path: &str, value: Value) -> Result<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::decode(
            path,
            format!("expected an object, found {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode the `{taskId: task}` map stored for one day. Absent means empty.
pub fn decode_task_day(path: &str, value: Option<Value>, calendar: &Calendar) -> Result<Vec<TaskRecord>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    let map = expect_object(path, value)?;
    map.into_iter()
        .map(|(task_id, task)| {
            let task_path = format!("{}/{}", path, task_id);
            decode_task(&task_path, &task_id, task, calendar)
        })
        .collect()
}

/// Decode the whole `{dateKey: {taskId: task}}` tree of a user.
pub fn decode_task_tree(
    path: &str,
    value: Option<Value>,
    calendar: &Calendar,
) -> Result<BTreeMap<DateKey, Vec<TaskRecord>>> {
    let mut days = BTreeMap::new();
    let Some(value) = value else {
        return Ok(days);
    };
    if value.is_null() {
        return Ok(days);
    }
    for (key, day) in expect_object(path, value)? {
        let date_key = DateKey::parse(&key).map_err(|e| SyncError::decode(path, e))?;
        let day_path = format!("{}/{}", path, key);
        days.insert(date_key, decode_task_day(&day_path, Some(day), calendar)?);
    }
    Ok(days)
}

// ============================================================================
// Profile
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    age: Option<u32>,
    #[serde(default)]
    gender: Option<Gender>,
    #[serde(default)]
    activity_level: Option<ActivityLevel>,
    #[serde(default)]
    goal: Option<FitnessGoal>,
    #[serde(default)]
    calorie_target: Option<u32>,
    #[serde(default)]
    protein_target: Option<u32>,
    #[serde(default)]
    carbs_target: Option<u32>,
    #[serde(default)]
    fat_target: Option<u32>,
    #[serde(default)]
    water_target: Option<u32>,
    #[serde(with = "epoch_seconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "epoch_seconds")]
    updated_at: DateTime<Utc>,
}

pub fn encode_profile(profile: &ProfileRecord) -> Result<Value> {
    let wire = WireProfile {
        display_name: profile.display_name.clone(),
        height: profile.height_cm,
        weight: profile.weight_kg,
        age: profile.age,
        gender: profile.gender,
        activity_level: profile.activity_level,
        goal: profile.goal,
        calorie_target: profile.targets.calories,
        protein_target: profile.targets.protein_g,
        carbs_target: profile.targets.carbs_g,
        fat_target: profile.targets.fat_g,
        water_target: profile.targets.water_ml,
        created_at: profile.created_at,
        updated_at: profile.updated_at,
    };
    serde_json::to_value(wire)
        .map_err(|e| SyncError::encode(format!("profile {}", profile.user_id), e))
}

pub fn decode_profile(path: &str, user_id: &str, value: Value) -> Result<ProfileRecord> {
    let wire: WireProfile = serde_json::from_value(value).map_err(|e| SyncError::decode(path, e))?;
    Ok(ProfileRecord {
        user_id: user_id.to_string(),
        display_name: wire.display_name,
        height_cm: wire.height,
        weight_kg: wire.weight,
        age: wire.age,
        gender: wire.gender,
        activity_level: wire.activity_level,
        goal: wire.goal,
        targets: NutritionTargets {
            calories: wire.calorie_target,
            protein_g: wire.protein_target,
            carbs_g: wire.carbs_target,
            fat_g: wire.fat_target,
            water_ml: wire.water_target,
        },
        created_at: wire.created_at,
        updated_at: wire.updated_at,
    })
}

// ============================================================================
// Daily completions
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCompletion {
    is_completed: bool,
    #[serde(default, with = "epoch_seconds_opt")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(with = "epoch_seconds")]
    updated_at: DateTime<Utc>,
}

pub fn encode_completion(record: &CompletionRecord) -> Result<Value> {
    let wire = WireCompletion {
        is_completed: record.is_completed,
        completed_at: record.completed_at,
        updated_at: record.updated_at,
    };
    serde_json::to_value(wire)
        .map_err(|e| SyncError::encode(format!("completion {}", record.date_key()), e))
}

pub fn decode_completion(path: &str, user_id: &str, date: NaiveDate, value: Value) -> Result<CompletionRecord> {
    let wire: WireCompletion = serde_json::from_value(value).map_err(|e| SyncError::decode(path, e))?;
    Ok(CompletionRecord {
        user_id: user_id.to_string(),
        date,
        is_completed: wire.is_completed,
        completed_at: wire.completed_at,
        updated_at: wire.updated_at,
    })
}

/// Decode the `{dateKey: completion}` map of a user.
pub fn decode_completion_tree(
    path: &str,
    user_id: &str,
    value: Option<Value>,
) -> Result<BTreeMap<DateKey, CompletionRecord>> {
    let mut out = BTreeMap::new();
    let Some(value) = value else {
        return Ok(out);
    };
    if value.is_null() {
        return Ok(out);
    }
    for (key, entry) in expect_object(path, value)? {
        let date_key = DateKey::parse(&key).map_err(|e| SyncError::decode(path, e))?;
        let entry_path = format!("{}/{}", path, key);
        out.insert(
            date_key,
            decode_completion(&entry_path, user_id, date_key.date(), entry)?,
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExerciseEntry, TaskDraft};
    use chrono::TimeZone;
    use serde_json::json;

    fn calendar() -> Calendar {
        Calendar::from_offset_minutes(-240)
    }

    fn sample_task() -> TaskRecord {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 30, 15).unwrap();
        let mut draft = TaskDraft::new(
            "Leg day",
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            NaiveTime::from_hms_opt(18, 45, 0).unwrap(),
            TaskCategory::Fitness,
        );
        draft.details = Some(TaskDetails::Workout(vec![ExerciseEntry {
            name: "Squat".into(),
            sets: Some(5),
            reps: Some(5),
            duration_minutes: None,
            calories: Some(120.0),
        }]));
        draft.is_ai_generated = true;
        draft.source = Some("assistant".into());
        draft.into_record("task-1".into(), now)
    }

    #[test]
    fn test_task_wire_shape() {
        let cal = calendar();
        let task = sample_task();
        let value = encode_task(&task, &cal).unwrap();

        assert_eq!(value["id"], "task-1");
        assert_eq!(value["category"], "fitness");
        assert_eq!(value["isAIGenerated"], true);
        // 2026-10-19 00:00 at UTC-4 is 04:00 UTC
        let day_start = Utc.with_ymd_and_hms(2026, 10, 19, 4, 0, 0).unwrap();
        assert_eq!(value["date"].as_f64().unwrap(), day_start.timestamp() as f64);
        assert!(value["createdAt"].is_f64());

        let back = decode_task("users/u/tasks/2026-10-19/task-1", "task-1", value, &cal).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_task_decode_rejects_bad_types() {
        let err = decode_task(
            "users/u/tasks/2026-10-19/t",
            "t",
            json!({"title": 5, "time": 0.0, "date": 0.0, "category": "fitness", "createdAt": 0.0, "updatedAt": 0.0}),
            &Calendar::utc(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Decode { ref path, .. } if path.ends_with("/t")));

        let err = decode_task(
            "p",
            "t",
            json!({"title": "x", "time": 0.0, "date": 0.0, "category": "yoga", "createdAt": 0.0, "updatedAt": 0.0}),
            &Calendar::utc(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
    }

    #[test]
    fn test_task_decode_rejects_mismatched_id() {
        let cal = Calendar::utc();
        let value = encode_task(&sample_task(), &cal).unwrap();
        let err = decode_task("p", "other-id", value, &cal).unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
    }

    #[test]
    fn test_task_tree() {
        let cal = calendar();
        let task = sample_task();
        let tree = json!({
            "2026-10-19": { "task-1": encode_task(&task, &cal).unwrap() },
            "2026-10-20": null,
        });
        let days = decode_task_tree("users/u/tasks", Some(tree), &cal).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[&task.date_key()], vec![task]);

        assert!(decode_task_tree("users/u/tasks", None, &cal).unwrap().is_empty());
        assert!(decode_task_tree("users/u/tasks", Some(json!({"bogus": {}})), &cal).is_err());
        assert!(decode_task_day("p", Some(json!([1, 2])), &cal).is_err());
    }

    #[test]
    fn test_profile_absent_fields_decode_as_none() {
        let value = json!({"createdAt": 1_760_000_000.0, "updatedAt": 1_760_000_000.5});
        let profile = decode_profile("users/u/profile", "u", value).unwrap();
        assert!(profile.is_blank());
        assert_eq!(profile.updated_at.timestamp_subsec_millis(), 500);

        let encoded = encode_profile(&profile).unwrap();
        assert_eq!(decode_profile("users/u/profile", "u", encoded).unwrap(), profile);
    }

    #[test]
    fn test_profile_decode_error() {
        let err = decode_profile("users/u/profile", "u", json!({"age": "old"})).unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
    }

    #[test]
    fn test_completion_tree() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 20, 0, 0).unwrap();
        let record = CompletionRecord::new("u", NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(), true, now);
        let tree = json!({ "2026-10-19": encode_completion(&record).unwrap() });
        let decoded = decode_completion_tree("users/u/dailyCompletions", "u", Some(tree)).unwrap();
        assert_eq!(decoded.get(&record.date_key()), Some(&record));
    }

    #[test]
    fn test_epoch_seconds_millisecond_precision() {
        let instant = Utc.timestamp_millis_opt(1_760_000_000_123).unwrap();
        assert_eq!(from_epoch_seconds(to_epoch_seconds(instant)), Some(instant));
        assert_eq!(from_epoch_seconds(f64::NAN), None);
    }
}
