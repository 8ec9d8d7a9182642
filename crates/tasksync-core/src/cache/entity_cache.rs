use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Months, NaiveDate};
use tracing::{debug, trace};

use super::CachedData;
use crate::clock::{Calendar, Clock};
use crate::date_key::{CacheWindow, DateKey};
use crate::error::Result;
use crate::models::TaskRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    user_id: String,
    date_key: DateKey,
}

impl CacheKey {
    fn new(user_id: &str, date_key: DateKey) -> Self {
        Self {
            user_id: user_id.to_string(),
            date_key,
        }
    }
}

#[derive(Default)]
struct State {
    slices: HashMap<CacheKey, CachedData<Vec<TaskRecord>>>,
    /// Bumped by every mutation. A fetch only populates the cache if no
    /// mutation happened while it was running.
    epoch: u64,
}

/// In-memory task cache keyed by `(userId, dateKey)`.
///
/// Every slice is kept sorted by scheduled time and only days inside the
/// rolling window are ever stored. All reads and writes of the slice map
/// go through a single lock, so listener callbacks and direct calls from
/// other tasks cannot interleave a read-modify-write.
pub struct EntityCache {
    window: CacheWindow,
    retention: Months,
    calendar: Calendar,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl EntityCache {
    pub fn new(window: CacheWindow, retention: Months, calendar: Calendar, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            retention,
            calendar,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn window(&self) -> CacheWindow {
        self.window
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }

    pub fn in_window(&self, date_key: DateKey) -> bool {
        self.window.contains(date_key, self.today())
    }

    /// Drop every slice whose day has left the window.
    fn evict_out_of_window(&self, state: &mut State) {
        let today = self.today();
        let window = self.window;
        let before = state.slices.len();
        state.slices.retain(|key, _| window.contains(key.date_key, today));
        let evicted = before - state.slices.len();
        if evicted > 0 {
            debug!(evicted, "Evicted out-of-window cache slices");
        }
    }

    /// Cached slice for a day, if present, in window and not stale.
    pub fn cached_tasks(&self, user_id: &str, date_key: DateKey) -> Option<Vec<TaskRecord>> {
        if !self.in_window(date_key) {
            return None;
        }
        let now = self.clock.now();
        let state = self.state();
        state
            .slices
            .get(&CacheKey::new(user_id, date_key))
            .filter(|cached| !cached.is_stale(self.retention, now))
            .map(|cached| cached.data.clone())
    }

    /// Cache-aside read.
    ///
    /// Returns the cached slice on a hit. On a miss runs `fetch`, stores the
    /// result when the day is inside the window, and returns it. Days
    /// outside the window are fetched every time and never stored.
    pub async fn get_tasks<F, Fut>(&self, user_id: &str, date: NaiveDate, fetch: F) -> Result<Vec<TaskRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<TaskRecord>>>,
    {
        let date_key = DateKey::from_date(date);
        if let Some(hit) = self.cached_tasks(user_id, date_key) {
            trace!(user_id, %date_key, count = hit.len(), "Task cache hit");
            return Ok(hit);
        }

        let epoch = self.state().epoch;
        debug!(user_id, %date_key, "Task cache miss");
        let mut tasks = fetch().await?;
        tasks.sort_by(|a, b| a.schedule_cmp(b));

        if !self.in_window(date_key) {
            debug!(user_id, %date_key, "Day outside cache window, not caching");
            return Ok(tasks);
        }

        let mut state = self.state();
        if state.epoch == epoch {
            state.slices.insert(
                CacheKey::new(user_id, date_key),
                CachedData::new(tasks.clone(), self.clock.now()),
            );
            self.evict_out_of_window(&mut state);
        } else {
            trace!(user_id, %date_key, "Cache mutated during fetch, skipping populate");
        }
        Ok(tasks)
    }

    fn insert_sorted(slice: &mut Vec<TaskRecord>, task: TaskRecord) {
        match slice.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => slice.push(task),
        }
        slice.sort_by(|a, b| a.schedule_cmp(b));
    }

    /// Add or replace a task in its day's slice. Only slices already
    /// cached are touched; an absent slice is loaded on the next read.
    /// Returns whether a cached slice was updated.
    pub fn add_task(&self, user_id: &str, task: &TaskRecord) -> bool {
        let mut state = self.state();
        state.epoch += 1;
        self.evict_out_of_window(&mut state);
        match state.slices.get_mut(&CacheKey::new(user_id, task.date_key())) {
            Some(cached) => {
                Self::insert_sorted(&mut cached.data, task.clone());
                true
            }
            None => false,
        }
    }

    /// Replace `old` with `new`, moving it between days if the date changed.
    pub fn update_task(&self, user_id: &str, old: &TaskRecord, new: &TaskRecord) {
        let mut state = self.state();
        state.epoch += 1;
        self.evict_out_of_window(&mut state);
        if let Some(cached) = state.slices.get_mut(&CacheKey::new(user_id, old.date_key())) {
            cached.data.retain(|t| t.id != old.id);
        }
        if let Some(cached) = state.slices.get_mut(&CacheKey::new(user_id, new.date_key())) {
            Self::insert_sorted(&mut cached.data, new.clone());
        }
    }

    /// Remove a task from a day's slice. Returns whether it was cached.
    pub fn remove_task(&self, user_id: &str, date_key: DateKey, task_id: &str) -> bool {
        let mut state = self.state();
        state.epoch += 1;
        self.evict_out_of_window(&mut state);
        match state.slices.get_mut(&CacheKey::new(user_id, date_key)) {
            Some(cached) => {
                let before = cached.data.len();
                cached.data.retain(|t| t.id != task_id);
                cached.data.len() != before
            }
            None => false,
        }
    }

    /// Install an authoritative slice, e.g. from a listener callback.
    /// Out-of-window days are ignored. Returns whether it was stored.
    pub fn replace_slice(&self, user_id: &str, date_key: DateKey, mut tasks: Vec<TaskRecord>) -> bool {
        let mut state = self.state();
        state.epoch += 1;
        self.evict_out_of_window(&mut state);
        if !self.in_window(date_key) {
            return false;
        }
        tasks.sort_by(|a, b| a.schedule_cmp(b));
        state.slices.insert(
            CacheKey::new(user_id, date_key),
            CachedData::new(tasks, self.clock.now()),
        );
        true
    }

    pub fn invalidate(&self, user_id: &str, date_key: DateKey) {
        let mut state = self.state();
        state.epoch += 1;
        state.slices.remove(&CacheKey::new(user_id, date_key));
    }

    /// Forget everything cached for a user.
    pub fn clear_user(&self, user_id: &str) {
        let mut state = self.state();
        state.epoch += 1;
        state.slices.retain(|key, _| key.user_id != user_id);
    }

    /// Number of tasks cached for a day (zero when the slice is absent).
    pub fn slice_len(&self, user_id: &str, date_key: DateKey) -> usize {
        self.state()
            .slices
            .get(&CacheKey::new(user_id, date_key))
            .map(|c| c.data.len())
            .unwrap_or(0)
    }

    pub fn is_cached(&self, user_id: &str, date_key: DateKey) -> bool {
        self.state()
            .slices
            .contains_key(&CacheKey::new(user_id, date_key))
    }

    /// Days currently cached for a user, ascending.
    pub fn cached_days(&self, user_id: &str) -> Vec<DateKey> {
        let mut keys: Vec<DateKey> = self
            .state()
            .slices
            .keys()
            .filter(|k| k.user_id == user_id)
            .map(|k| k.date_key)
            .collect();
        keys.sort();
        keys
    }

    /// Human-readable age of a cached slice ("5m ago").
    pub fn slice_age(&self, user_id: &str, date_key: DateKey) -> Option<String> {
        let now = self.clock.now();
        self.state()
            .slices
            .get(&CacheKey::new(user_id, date_key))
            .map(|c| c.age_display(now))
    }
}
