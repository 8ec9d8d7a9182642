use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EntitySync, RepoContext, SyncRange, SyncReport};
use crate::cache::EntityCache;
use crate::conflict::{pull_winner, push_winner};
use crate::date_key::DateKey;
use crate::dedup::OpKey;
use crate::error::{Result, SyncError};
use crate::listeners::ListenerRegistry;
use crate::local::Tombstone;
use crate::models::{TaskDraft, TaskPatch, TaskRecord};
use crate::remote::{codec, paths, SnapshotCallback};

/// Task CRUD, live day listeners and task sync.
///
/// Local store and cache mutations for tasks all happen under one lock, so
/// a listener snapshot being merged can never interleave with a delete or
/// an add. Remote calls happen after the lock is released.
pub struct TaskRepository {
    ctx: RepoContext,
    cache: Arc<EntityCache>,
    listeners: Arc<ListenerRegistry>,
    merge_lock: Mutex<()>,
}

impl TaskRepository {
    pub fn new(ctx: RepoContext, cache: Arc<EntityCache>, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            ctx,
            cache,
            listeners,
            merge_lock: Mutex::new(()),
        }
    }

    fn merge_guard(&self) -> MutexGuard<'_, ()> {
        self.merge_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    // ===== Reads =====

    /// Tasks for one day, sorted by scheduled time. Served from the cache
    /// when possible, otherwise from the local store, falling back to the
    /// remote for days never stored locally.
    pub async fn tasks_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<TaskRecord>> {
        self.cache
            .get_tasks(user_id, date, || self.load_day(user_id, DateKey::from_date(date)))
            .await
    }

    /// Tasks for every day in `[start, end]`, sorted by date then time.
    pub async fn tasks_in_range(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<TaskRecord>> {
        let mut out = Vec::new();
        for key in DateKey::range_inclusive(DateKey::from_date(start), DateKey::from_date(end)) {
            out.extend(self.tasks_for_date(user_id, key.date()).await?);
        }
        Ok(out)
    }

    pub fn find_task(&self, user_id: &str, task_id: &str) -> Result<Option<TaskRecord>> {
        self.ctx.local.find_task(user_id, task_id)
    }

    async fn load_day(&self, user_id: &str, date_key: DateKey) -> Result<Vec<TaskRecord>> {
        if self.ctx.local.day_saved_at(user_id, date_key)?.is_some() {
            return self.ctx.local.query_tasks(user_id, date_key);
        }

        // Never stored locally: ask the remote, but stay usable offline
        let path = paths::tasks_for_day(user_id, date_key);
        let value = match self.ctx.remote.read_once(&path).await {
            Ok(value) => value,
            Err(e) if e.is_transport() => {
                warn!(user_id, %date_key, error = %e, "Remote unavailable, serving local tasks");
                return self.ctx.local.query_tasks(user_id, date_key);
            }
            Err(e) => return Err(e),
        };
        let remote = codec::decode_task_day(&path, value, &self.ctx.calendar)?;
        if !remote.is_empty() {
            self.apply_remote_snapshot(user_id, date_key, remote)?;
        }
        self.ctx.local.query_tasks(user_id, date_key)
    }

    // ===== Writes =====

    /// Create a task from a draft with a fresh id.
    pub async fn create_task(&self, user_id: &str, draft: TaskDraft) -> Result<TaskRecord> {
        let record = draft.into_record(Uuid::new_v4().to_string(), self.ctx.now());
        self.add_task(user_id, record).await
    }

    /// Store a task and upload it. A concurrent upload of the same task is
    /// collapsed into the one already in flight and reported as success.
    pub async fn add_task(&self, user_id: &str, task: TaskRecord) -> Result<TaskRecord> {
        {
            let _merge = self.merge_guard();
            self.ctx.local.clear_tombstone(user_id, &task.id)?;
            self.ctx.local.upsert_task(user_id, &task)?;
            self.cache.add_task(user_id, &task);
        }

        let key = OpKey::new(user_id, task.date_key(), task.id.as_str());
        let Some(_permit) = self.ctx.dedup.acquire(key) else {
            return Ok(task);
        };

        let path = paths::task(user_id, task.date_key(), &task.id);
        self.ctx
            .remote
            .write(&path, codec::encode_task(&task, &self.ctx.calendar)?)
            .await?;
        self.ctx
            .local
            .record_synced(user_id, [(task.id.clone(), task.updated_at)])?;
        debug!(user_id, task_id = %task.id, date_key = %task.date_key(), "Task added");
        Ok(task)
    }

    /// Replace a stored task with `updated` (same id). Moves it between
    /// days when the date changed.
    pub async fn update_task(&self, user_id: &str, updated: TaskRecord) -> Result<TaskRecord> {
        let Some(previous) = self.find_task(user_id, &updated.id)? else {
            return Err(SyncError::NotFound(format!("task {}", updated.id)));
        };

        let moved = previous.date != updated.date;
        {
            let _merge = self.merge_guard();
            if moved {
                self.ctx
                    .local
                    .remove_task_on(user_id, previous.date_key(), &previous.id)?;
            }
            self.ctx.local.upsert_task(user_id, &updated)?;
            self.cache.update_task(user_id, &previous, &updated);
        }

        // Skipped uploads are picked up by the next push, local is newer
        let key = OpKey::new(user_id, updated.date_key(), updated.id.as_str());
        let Some(_permit) = self.ctx.dedup.acquire(key) else {
            return Ok(updated);
        };

        if moved {
            self.ctx
                .remote
                .delete(&paths::task(user_id, previous.date_key(), &previous.id))
                .await?;
        }
        let path = paths::task(user_id, updated.date_key(), &updated.id);
        self.ctx
            .remote
            .write(&path, codec::encode_task(&updated, &self.ctx.calendar)?)
            .await?;
        self.ctx
            .local
            .record_synced(user_id, [(updated.id.clone(), updated.updated_at)])?;
        debug!(user_id, task_id = %updated.id, moved, "Task updated");
        Ok(updated)
    }

    /// Apply field changes to a task. `None` when the task does not exist.
    pub async fn patch_task(&self, user_id: &str, task_id: &str, patch: &TaskPatch) -> Result<Option<TaskRecord>> {
        let Some(current) = self.find_task(user_id, task_id)? else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(Some(current));
        }
        let updated = patch.apply(&current, self.ctx.now());
        self.update_task(user_id, updated).await.map(Some)
    }

    /// Flip the done flag of a task.
    pub async fn toggle_done(&self, user_id: &str, task_id: &str) -> Result<Option<TaskRecord>> {
        let Some(current) = self.find_task(user_id, task_id)? else {
            return Ok(None);
        };
        let updated = current.with_done(!current.is_done, self.ctx.now());
        self.update_task(user_id, updated).await.map(Some)
    }

    /// Delete a task everywhere. Returns false if it was not stored.
    ///
    /// A tombstone is recorded before anything is removed so that a stale
    /// snapshot arriving later cannot bring the task back, and so that the
    /// next push can retry the remote delete if this one fails.
    pub async fn delete_task(&self, user_id: &str, task_id: &str) -> Result<bool> {
        let Some(task) = self.find_task(user_id, task_id)? else {
            return Ok(false);
        };
        let date_key = task.date_key();

        {
            let _merge = self.merge_guard();
            let tombstone = Tombstone {
                date: task.date,
                deleted_at: self.ctx.now(),
            };
            self.ctx.local.add_tombstone(user_id, task_id, tombstone)?;
            self.ctx.local.remove_task_on(user_id, date_key, task_id)?;
            self.ctx.local.forget_synced(user_id, [task_id])?;
            self.cache.remove_task(user_id, date_key, task_id);
        }

        // A skipped remote delete stays pending as a tombstone
        let key = OpKey::new(user_id, date_key, task_id);
        let Some(_permit) = self.ctx.dedup.acquire(key) else {
            return Ok(true);
        };

        self.ctx
            .remote
            .delete(&paths::task(user_id, date_key, task_id))
            .await?;
        debug!(user_id, task_id, %date_key, "Task deleted");
        Ok(true)
    }

    // ===== Remote snapshots =====

    /// Merge an authoritative remote view of one day into the local store
    /// and the cache. Returns the number of local records changed.
    ///
    /// Remote copies win only when strictly newer than the local one, and
    /// never when the id was deleted locally at or after the remote edit.
    /// A local record missing from the snapshot is dropped only when the
    /// remote held it before and it has no local edit since; otherwise it
    /// is waiting for its push.
    pub fn apply_remote_snapshot(&self, user_id: &str, date_key: DateKey, remote: Vec<TaskRecord>) -> Result<usize> {
        let _merge = self.merge_guard();
        self.merge_remote_day(user_id, date_key, remote)
    }

    fn merge_remote_day(&self, user_id: &str, date_key: DateKey, remote: Vec<TaskRecord>) -> Result<usize> {
        let mut local: HashMap<String, TaskRecord> = self
            .ctx
            .local
            .query_tasks(user_id, date_key)?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let tombstones = self.ctx.local.tombstones(user_id)?;
        let synced = self.ctx.local.synced_versions(user_id)?;

        let mut changed = 0;
        let mut seen = Vec::with_capacity(remote.len());
        for task in remote {
            if task.date_key() != date_key {
                warn!(user_id, task_id = %task.id, %date_key, "Remote task stored under the wrong day, skipping");
                continue;
            }
            let local_copy = local.remove(&task.id);
            if let Some(tombstone) = tombstones.get(&task.id) {
                if task.updated_at <= tombstone.deleted_at {
                    debug!(user_id, task_id = %task.id, "Ignoring stale snapshot of a deleted task");
                    continue;
                }
                self.ctx.local.clear_tombstone(user_id, &task.id)?;
            }
            seen.push((task.id.clone(), task.updated_at));

            if local_copy.is_none() {
                // The task may have been moved here from another day
                if let Some(elsewhere) = self.ctx.local.find_task(user_id, &task.id)? {
                    if elsewhere.updated_at >= task.updated_at {
                        continue;
                    }
                    self.ctx
                        .local
                        .remove_task_on(user_id, elsewhere.date_key(), &elsewhere.id)?;
                    self.cache.remove_task(user_id, elsewhere.date_key(), &elsewhere.id);
                }
            }

            if let Some(winner) = pull_winner(local_copy.as_ref(), Some(&task)) {
                self.ctx.local.upsert_task(user_id, winner)?;
                self.cache.add_task(user_id, winner);
                changed += 1;
            }
        }

        // Whatever is left was not in the snapshot
        let mut gone = Vec::new();
        for task in local.into_values() {
            let deleted_remotely = synced
                .get(&task.id)
                .is_some_and(|version| task.updated_at <= *version);
            if !deleted_remotely {
                continue;
            }
            self.ctx.local.remove_task_on(user_id, date_key, &task.id)?;
            self.cache.remove_task(user_id, date_key, &task.id);
            debug!(user_id, task_id = %task.id, %date_key, "Task deleted on the remote, dropping local copy");
            gone.push(task.id);
            changed += 1;
        }

        self.ctx.local.record_synced(user_id, seen)?;
        self.ctx.local.forget_synced(user_id, gone.iter().map(String::as_str))?;
        Ok(changed)
    }

    /// Listen to one day of the remote store. Every snapshot is merged into
    /// the local store and the cache. Re-watching a day replaces the
    /// previous listener.
    pub fn watch_day(self: &Arc<Self>, user_id: &str, date: NaiveDate) -> Result<()> {
        let date_key = DateKey::from_date(date);
        let path = paths::tasks_for_day(user_id, date_key);
        let repo: Weak<Self> = Arc::downgrade(self);
        let user = user_id.to_string();
        let calendar = self.ctx.calendar;

        let on_update: SnapshotCallback = Arc::new(move |value| {
            let Some(repo) = repo.upgrade() else {
                return;
            };
            let result = codec::decode_task_day(&path, value, &calendar)
                .and_then(|tasks| repo.apply_remote_snapshot(&user, date_key, tasks));
            match result {
                Ok(0) => {}
                Ok(adopted) => debug!(user_id = %user, %date_key, adopted, "Applied remote snapshot"),
                Err(e) => warn!(user_id = %user, %date_key, error = %e, "Failed to apply remote snapshot"),
            }
        });
        self.listeners.subscribe(user_id, date_key, on_update)
    }

    pub fn unwatch_day(&self, user_id: &str, date: NaiveDate) -> bool {
        self.listeners.unsubscribe(user_id, DateKey::from_date(date))
    }

    async fn fetch_remote_tree(&self, user_id: &str) -> Result<BTreeMap<DateKey, Vec<TaskRecord>>> {
        let path = paths::tasks_root(user_id);
        let value = self.ctx.remote.read_once(&path).await?;
        codec::decode_task_tree(&path, value, &self.ctx.calendar)
    }

    /// Send pending deletions to the remote. Tombstones are cleared once
    /// the remote has accepted the delete.
    async fn replay_tombstones(&self, user_id: &str) -> Result<usize> {
        let tombstones = self.ctx.local.tombstones(user_id)?;
        let mut deleted = 0;
        for (task_id, tombstone) in tombstones {
            let key = OpKey::new(user_id, tombstone.date_key(), task_id.as_str());
            let Some(_permit) = self.ctx.dedup.acquire(key) else {
                continue;
            };
            self.ctx
                .remote
                .delete(&paths::task(user_id, tombstone.date_key(), &task_id))
                .await?;
            self.ctx.local.clear_tombstone(user_id, &task_id)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

#[async_trait]
impl EntitySync for TaskRepository {
    fn entity(&self) -> &'static str {
        "tasks"
    }

    async fn sync_from_cloud(&self, user_id: &str, range: SyncRange) -> Result<SyncReport> {
        let mut tree = self.fetch_remote_tree(user_id).await?;
        tree.retain(|date_key, _| range.contains(*date_key));
        // Days emptied on the remote vanish from the tree entirely
        for date_key in self.ctx.local.tasks_between(user_id, range.start, range.end)?.into_keys() {
            tree.entry(date_key).or_default();
        }

        let mut pulled = 0;
        for (date_key, tasks) in tree {
            pulled += self.apply_remote_snapshot(user_id, date_key, tasks)?;
        }
        if pulled > 0 {
            info!(user_id, pulled, "Tasks pulled from remote");
        }
        Ok(SyncReport::pulled(pulled))
    }

    async fn sync_to_cloud(&self, user_id: &str, range: SyncRange) -> Result<SyncReport> {
        let deleted = self.replay_tombstones(user_id).await?;

        let remote: HashMap<String, TaskRecord> = self
            .fetch_remote_tree(user_id)
            .await?
            .into_values()
            .flatten()
            .map(|t| (t.id.clone(), t))
            .collect();
        let local = self.ctx.local.tasks_between(user_id, range.start, range.end)?;
        let synced = self.ctx.local.synced_versions(user_id)?;

        let mut pushed = 0;
        for task in local.into_values().flatten() {
            let remote_copy = remote.get(&task.id);
            let unchanged_since_sync = synced.get(&task.id).is_some_and(|version| task.updated_at <= *version);
            if remote_copy.is_none() && unchanged_since_sync {
                // Deleted elsewhere; the next pull drops it
                continue;
            }
            let Some(winner) = push_winner(Some(&task), remote_copy) else {
                continue;
            };
            let key = OpKey::new(user_id, winner.date_key(), winner.id.as_str());
            let Some(_permit) = self.ctx.dedup.acquire(key) else {
                continue;
            };
            if let Some(stale) = remote_copy.filter(|r| r.date != winner.date) {
                self.ctx
                    .remote
                    .delete(&paths::task(user_id, stale.date_key(), &stale.id))
                    .await?;
            }
            self.ctx
                .remote
                .write(
                    &paths::task(user_id, winner.date_key(), &winner.id),
                    codec::encode_task(winner, &self.ctx.calendar)?,
                )
                .await?;
            self.ctx
                .local
                .record_synced(user_id, [(winner.id.clone(), winner.updated_at)])?;
            pushed += 1;
        }
        if pushed > 0 || deleted > 0 {
            info!(user_id, pushed, deleted, "Tasks pushed to remote");
        }
        Ok(SyncReport {
            pushed,
            deleted,
            ..SyncReport::default()
        })
    }
}
