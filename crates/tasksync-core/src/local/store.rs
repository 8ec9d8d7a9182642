use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::CachedData;
use crate::date_key::DateKey;
use crate::error::{Result, SyncError};
use crate::models::{CompletionRecord, ProfileRecord, TaskRecord};
use crate::remote::paths::validate_segment;

const PROFILE_FILE: &str = "profile";
const COMPLETIONS_FILE: &str = "completions";
const TOMBSTONES_FILE: &str = "tombstones";
const SYNCED_FILE: &str = "synced";
const TASKS_DIR: &str = "tasks";

/// Marker left behind by a task deletion until the remote has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub date: NaiveDate,
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn date_key(&self) -> DateKey {
        DateKey::from_date(self.date)
    }
}

/// Durable on-device store.
///
/// One directory per user: `profile.json`, `completions.json`,
/// `tombstones.json`, `synced.json` and `tasks/{dateKey}.json`. Files hold a
/// [`CachedData`] so every record set carries the time it was saved.
/// All read-modify-write cycles go through one lock; no call touches the
/// network.
pub struct LocalStore {
    root: PathBuf,
    io_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            io_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        validate_segment("user id", user_id)?;
        Ok(self.root.join(user_id))
    }

    fn file_path(&self, user_id: &str, name: &str) -> Result<PathBuf> {
        Ok(self.user_dir(user_id)?.join(format!("{}.json", name)))
    }

    fn day_path(&self, user_id: &str, date_key: DateKey) -> Result<PathBuf> {
        Ok(self
            .user_dir(user_id)?
            .join(TASKS_DIR)
            .join(format!("{}.json", date_key)))
    }

    fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<CachedData<T>>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Store(format!("Failed to read {}: {}", path.display(), e)))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .map_err(|e| SyncError::decode(path.display().to_string(), e))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(path: &Path, data: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cached = CachedData::new(data, Utc::now());
        let contents = serde_json::to_string_pretty(&cached)
            .map_err(|e| SyncError::encode(path.display().to_string(), e))?;

        // Write then rename so a crash never leaves a half-written file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn remove_file(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_day(&self, user_id: &str, date_key: DateKey) -> Result<Vec<TaskRecord>> {
        Ok(Self::load::<Vec<TaskRecord>>(&self.day_path(user_id, date_key)?)?
            .map(|c| c.data)
            .unwrap_or_default())
    }

    fn save_day(&self, user_id: &str, date_key: DateKey, tasks: &[TaskRecord]) -> Result<()> {
        let path = self.day_path(user_id, date_key)?;
        if tasks.is_empty() {
            return Self::remove_file(&path);
        }
        Self::save(&path, &tasks)
    }

    // ===== Profile =====

    pub fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        let _guard = self.guard();
        Ok(Self::load(&self.file_path(user_id, PROFILE_FILE)?)?.map(|c| c.data))
    }

    pub fn upsert_profile(&self, profile: &ProfileRecord) -> Result<()> {
        let _guard = self.guard();
        Self::save(&self.file_path(&profile.user_id, PROFILE_FILE)?, profile)
    }

    // ===== Tasks =====

    /// Tasks stored for one day, in stored order.
    pub fn query_tasks(&self, user_id: &str, date_key: DateKey) -> Result<Vec<TaskRecord>> {
        let _guard = self.guard();
        self.load_day(user_id, date_key)
    }

    /// When the day file was last written, if it exists.
    pub fn day_saved_at(&self, user_id: &str, date_key: DateKey) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.guard();
        Ok(Self::load::<Vec<TaskRecord>>(&self.day_path(user_id, date_key)?)?.map(|c| c.cached_at))
    }

    /// Insert or replace a task in its day file.
    pub fn upsert_task(&self, user_id: &str, task: &TaskRecord) -> Result<()> {
        let _guard = self.guard();
        let key = task.date_key();
        let mut tasks = self.load_day(user_id, key)?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        tasks.sort_by(|a, b| a.schedule_cmp(b));
        self.save_day(user_id, key, &tasks)
    }

    /// Remove a task from a known day. Returns whether it was present.
    pub fn remove_task_on(&self, user_id: &str, date_key: DateKey, task_id: &str) -> Result<bool> {
        let _guard = self.guard();
        let mut tasks = self.load_day(user_id, date_key)?;
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() == before {
            return Ok(false);
        }
        self.save_day(user_id, date_key, &tasks)?;
        Ok(true)
    }

    /// Remove a task wherever it is stored. Returns whether it was present.
    pub fn delete_task(&self, user_id: &str, task_id: &str) -> Result<bool> {
        let Some(task) = self.find_task(user_id, task_id)? else {
            return Ok(false);
        };
        self.remove_task_on(user_id, task.date_key(), task_id)
    }

    /// Look a task up by id across every stored day.
    pub fn find_task(&self, user_id: &str, task_id: &str) -> Result<Option<TaskRecord>> {
        let _guard = self.guard();
        for key in self.list_days(user_id)? {
            if let Some(task) = self.load_day(user_id, key)?.into_iter().find(|t| t.id == task_id) {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Tasks for every stored day in `[start, end]`, grouped by day.
    pub fn tasks_between(
        &self,
        user_id: &str,
        start: DateKey,
        end: DateKey,
    ) -> Result<BTreeMap<DateKey, Vec<TaskRecord>>> {
        let _guard = self.guard();
        let mut out = BTreeMap::new();
        for key in self.list_days(user_id)? {
            if key >= start && key <= end {
                out.insert(key, self.load_day(user_id, key)?);
            }
        }
        Ok(out)
    }

    fn list_days(&self, user_id: &str) -> Result<Vec<DateKey>> {
        let dir = self.user_dir(user_id)?.join(TASKS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match DateKey::parse(stem) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(file = %name, error = %e, "Skipping unexpected file in task directory"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    // ===== Completions =====

    pub fn load_completions(&self, user_id: &str) -> Result<BTreeMap<DateKey, CompletionRecord>> {
        let _guard = self.guard();
        self.read_completions(user_id)
    }

    fn read_completions(&self, user_id: &str) -> Result<BTreeMap<DateKey, CompletionRecord>> {
        Ok(Self::load(&self.file_path(user_id, COMPLETIONS_FILE)?)?
            .map(|c| c.data)
            .unwrap_or_default())
    }

    pub fn query_completion(&self, user_id: &str, date_key: DateKey) -> Result<Option<CompletionRecord>> {
        Ok(self.load_completions(user_id)?.remove(&date_key))
    }

    pub fn upsert_completion(&self, record: &CompletionRecord) -> Result<()> {
        let _guard = self.guard();
        let mut all = self.read_completions(&record.user_id)?;
        all.insert(record.date_key(), record.clone());
        Self::save(&self.file_path(&record.user_id, COMPLETIONS_FILE)?, &all)
    }

    // ===== Tombstones =====

    pub fn tombstones(&self, user_id: &str) -> Result<BTreeMap<String, Tombstone>> {
        let _guard = self.guard();
        self.read_tombstones(user_id)
    }

    fn read_tombstones(&self, user_id: &str) -> Result<BTreeMap<String, Tombstone>> {
        Ok(Self::load(&self.file_path(user_id, TOMBSTONES_FILE)?)?
            .map(|c| c.data)
            .unwrap_or_default())
    }

    pub fn add_tombstone(&self, user_id: &str, task_id: &str, tombstone: Tombstone) -> Result<()> {
        let _guard = self.guard();
        let mut all = self.read_tombstones(user_id)?;
        all.insert(task_id.to_string(), tombstone);
        Self::save(&self.file_path(user_id, TOMBSTONES_FILE)?, &all)
    }

    pub fn clear_tombstone(&self, user_id: &str, task_id: &str) -> Result<()> {
        let _guard = self.guard();
        let mut all = self.read_tombstones(user_id)?;
        if all.remove(task_id).is_some() {
            Self::save(&self.file_path(user_id, TOMBSTONES_FILE)?, &all)?;
        }
        Ok(())
    }

    // ===== Synced versions =====

    /// Newest `updated_at` of each task known to be on the remote, by id.
    pub fn synced_versions(&self, user_id: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let _guard = self.guard();
        self.read_synced(user_id)
    }

    fn read_synced(&self, user_id: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        Ok(Self::load(&self.file_path(user_id, SYNCED_FILE)?)?
            .map(|c| c.data)
            .unwrap_or_default())
    }

    /// Record versions seen on the remote. A recorded version never moves
    /// backwards.
    pub fn record_synced<I>(&self, user_id: &str, versions: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, DateTime<Utc>)>,
    {
        let _guard = self.guard();
        let mut all = self.read_synced(user_id)?;
        let mut changed = false;
        for (task_id, version) in versions {
            match all.get(&task_id) {
                Some(seen) if *seen >= version => {}
                _ => {
                    all.insert(task_id, version);
                    changed = true;
                }
            }
        }
        if changed {
            Self::save(&self.file_path(user_id, SYNCED_FILE)?, &all)?;
        }
        Ok(())
    }

    pub fn forget_synced<'a, I>(&self, user_id: &str, task_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let _guard = self.guard();
        let mut all = self.read_synced(user_id)?;
        let before = all.len();
        for task_id in task_ids {
            all.remove(task_id);
        }
        if all.len() != before {
            Self::save(&self.file_path(user_id, SYNCED_FILE)?, &all)?;
        }
        Ok(())
    }

    // ===== Maintenance =====

    /// Remove everything stored for a user.
    pub fn delete_all(&self, user_id: &str) -> Result<()> {
        let _guard = self.guard();
        let dir = self.user_dir(user_id)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            debug!(user_id, "Local data removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskCategory, TaskDraft};
    use chrono::{NaiveTime, TimeZone};

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    fn task(id: &str, day: u32, hour: u32) -> TaskRecord {
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        TaskDraft::new(
            format!("task {}", id),
            NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            TaskCategory::Other,
        )
        .into_record(id.to_string(), now)
    }

    #[test]
    fn test_missing_profile_is_none() {
        let (_dir, store) = store();
        assert_eq!(store.load_profile("u1").unwrap(), None);
    }

    #[test]
    fn test_profile_persists_across_instances() {
        let (dir, store) = store();
        let profile = ProfileRecord::new("u1", Utc::now());
        store.upsert_profile(&profile).unwrap();
        drop(store);

        let reopened = LocalStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.load_profile("u1").unwrap(), Some(profile));
    }

    #[test]
    fn test_upsert_keeps_day_sorted_and_replaces_by_id() {
        let (_dir, store) = store();
        store.upsert_task("u1", &task("late", 19, 20)).unwrap();
        store.upsert_task("u1", &task("early", 19, 6)).unwrap();
        let mut renamed = task("late", 19, 20);
        renamed.title = "renamed".into();
        store.upsert_task("u1", &renamed).unwrap();

        let key = DateKey::from_date(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        let day = store.query_tasks("u1", key).unwrap();
        let ids: Vec<&str> = day.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(day[1].title, "renamed");
        assert!(store.day_saved_at("u1", key).unwrap().is_some());
    }

    #[test]
    fn test_find_and_delete_task() {
        let (_dir, store) = store();
        store.upsert_task("u1", &task("a", 3, 8)).unwrap();
        store.upsert_task("u1", &task("b", 4, 8)).unwrap();

        assert_eq!(store.find_task("u1", "b").unwrap().map(|t| t.id), Some("b".to_string()));
        assert!(store.delete_task("u1", "b").unwrap());
        assert!(!store.delete_task("u1", "b").unwrap());
        assert_eq!(store.find_task("u1", "b").unwrap(), None);

        // empty day files are removed
        let key = DateKey::from_date(NaiveDate::from_ymd_opt(2026, 10, 4).unwrap());
        assert_eq!(store.day_saved_at("u1", key).unwrap(), None);
    }

    #[test]
    fn test_tasks_between() {
        let (_dir, store) = store();
        for day in [1, 5, 9] {
            store.upsert_task("u1", &task(&format!("t{}", day), day, 8)).unwrap();
        }
        let start = DateKey::from_date(NaiveDate::from_ymd_opt(2026, 10, 2).unwrap());
        let end = DateKey::from_date(NaiveDate::from_ymd_opt(2026, 10, 9).unwrap());
        let found = store.tasks_between("u1", start, end).unwrap();
        let keys: Vec<String> = found.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2026-10-05", "2026-10-09"]);
    }

    #[test]
    fn test_completions_and_tombstones() {
        let (_dir, store) = store();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let record = CompletionRecord::new("u1", date, true, Utc::now());
        store.upsert_completion(&record).unwrap();
        assert_eq!(
            store.query_completion("u1", DateKey::from_date(date)).unwrap(),
            Some(record)
        );

        let stone = Tombstone { date, deleted_at: Utc::now() };
        store.add_tombstone("u1", "t1", stone).unwrap();
        assert_eq!(store.tombstones("u1").unwrap().get("t1"), Some(&stone));
        store.clear_tombstone("u1", "t1").unwrap();
        assert!(store.tombstones("u1").unwrap().is_empty());
    }

    #[test]
    fn test_synced_versions_only_move_forward() {
        let (_dir, store) = store();
        let t1 = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();

        store.record_synced("u1", [("a".to_string(), t2), ("b".to_string(), t1)]).unwrap();
        store.record_synced("u1", [("a".to_string(), t1)]).unwrap();
        let synced = store.synced_versions("u1").unwrap();
        assert_eq!(synced.get("a"), Some(&t2));
        assert_eq!(synced.get("b"), Some(&t1));

        store.forget_synced("u1", ["a"]).unwrap();
        assert!(!store.synced_versions("u1").unwrap().contains_key("a"));
    }

    #[test]
    fn test_delete_all_and_user_isolation() {
        let (_dir, store) = store();
        store.upsert_task("u1", &task("a", 3, 8)).unwrap();
        store.upsert_task("u2", &task("b", 3, 8)).unwrap();
        store.delete_all("u1").unwrap();
        assert_eq!(store.find_task("u1", "a").unwrap(), None);
        assert!(store.find_task("u2", "b").unwrap().is_some());
    }

    #[test]
    fn test_rejects_path_like_user_ids() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load_profile("../escape"),
            Err(SyncError::InvalidFormat(_))
        ));
    }
}
