use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::paths::segments;
use super::{RemoteStore, SnapshotCallback, Subscription};
use crate::error::{Result, SyncError};

struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

#[derive(Default)]
struct Inner {
    tree: Mutex<Value>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    offline: AtomicBool,
    write_latency: Mutex<Option<Duration>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    next_key: AtomicU64,
}

/// In-process remote store.
///
/// Behaves like the hosted tree: writing `null` deletes, deletes prune
/// empty parents, and subscribers on a path hear about writes at, above or
/// below it. Clone is cheap and shares the same tree.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Inner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay applied to writes and deletes before they land.
    pub fn set_write_latency(&self, latency: Option<Duration>) {
        *lock(&self.inner.write_latency) = latency;
    }

    /// Number of writes that reached the store.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of deletes that reached the store.
    pub fn delete_count(&self) -> usize {
        self.inner.deletes.load(Ordering::SeqCst)
    }

    /// Live subscriptions registered exactly on `path`.
    pub fn active_subscriptions(&self, path: &str) -> usize {
        let wanted: Vec<String> = segments(path).into_iter().map(String::from).collect();
        lock(&self.inner.subscribers)
            .values()
            .filter(|s| s.path == wanted)
            .count()
    }

    pub fn total_subscriptions(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Current value at `path`, without going through the network checks.
    pub fn peek(&self, path: &str) -> Option<Value> {
        get_at(&lock(&self.inner.tree), &segments(path)).cloned()
    }

    /// Hand `value` to the subscribers of `path` without storing it.
    /// Simulates a delayed listener event carrying an old snapshot.
    pub fn deliver(&self, path: &str, value: Option<Value>) {
        let target: Vec<&str> = segments(path);
        for sub in lock(&self.inner.subscribers).values() {
            if sub.path.iter().map(String::as_str).eq(target.iter().copied()) {
                let _ = sub.tx.send(value.clone());
            }
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(SyncError::Network("remote store unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.inner.write_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Apply a change and notify overlapping subscribers while the tree is
    /// still locked, so every subscriber sees changes in apply order.
    fn apply(&self, path: &str, value: Option<Value>) {
        let segs = segments(path);
        let mut tree = lock(&self.inner.tree);
        match value {
            Some(v) if !v.is_null() => set_at(&mut tree, &segs, v),
            _ => {
                remove_at(&mut tree, &segs);
            }
        }

        let subscribers = lock(&self.inner.subscribers);
        for sub in subscribers.values() {
            if overlaps(&sub.path, &segs) {
                let sub_segs: Vec<&str> = sub.path.iter().map(String::as_str).collect();
                let _ = sub.tx.send(get_at(&tree, &sub_segs).cloned());
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn write(&self, path: &str, value: Value) -> Result<()> {
        self.check_online()?;
        self.simulate_latency().await;
        self.check_online()?;
        trace!(path, "memory remote write");
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.apply(path, Some(value));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_online()?;
        self.simulate_latency().await;
        self.check_online()?;
        trace!(path, "memory remote delete");
        self.inner.deletes.fetch_add(1, Ordering::SeqCst);
        self.apply(path, None);
        Ok(())
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        self.check_online()?;
        Ok(self.peek(path))
    }

    fn subscribe(&self, path: &str, callback: SnapshotCallback) -> Result<Subscription> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::NotAllowed("subscribe needs a tokio runtime".to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Value>>();
        let active = Arc::new(AtomicBool::new(true));
        let path_segs: Vec<String> = segments(path).into_iter().map(String::from).collect();
        let key = self.inner.next_key.fetch_add(1, Ordering::SeqCst);

        {
            // Register and send the initial value under the tree lock so no
            // write can slip in between.
            let tree = lock(&self.inner.tree);
            let segs: Vec<&str> = path_segs.iter().map(String::as_str).collect();
            let _ = tx.send(get_at(&tree, &segs).cloned());
            lock(&self.inner.subscribers).insert(
                key,
                Subscriber {
                    path: path_segs.clone(),
                    tx,
                },
            );
        }

        let subscription = {
            let inner = Arc::clone(&self.inner);
            let active = Arc::clone(&active);
            let disposed_path = path.to_string();
            Subscription::new(path, move || {
                active.store(false, Ordering::SeqCst);
                lock(&inner.subscribers).remove(&key);
                debug!(path = %disposed_path, "memory remote subscription disposed");
            })
        };

        runtime.spawn(async move {
            while let Some(value) = rx.recv().await {
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                callback(value);
            }
        });

        Ok(subscription)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// True when one path is a prefix of the other.
fn overlaps(subscribed: &[String], written: &[&str]) -> bool {
    subscribed
        .iter()
        .zip(written.iter())
        .all(|(a, b)| a == b)
}

fn get_at<'a>(tree: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut node = tree;
    for seg in segs {
        node = node.as_object()?.get(*seg)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

fn set_at(tree: &mut Value, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        *tree = value;
        return;
    };
    let mut node = tree;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(seg.to_string()).or_insert(Value::Null),
            _ => return,
        };
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}

/// Remove the value at `segs`, then prune any parent left empty.
fn remove_at(tree: &mut Value, segs: &[&str]) -> bool {
    let Some((first, rest)) = segs.split_first() else {
        *tree = Value::Null;
        return true;
    };
    let Value::Object(map) = tree else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(*first).is_some();
    }
    let (removed, now_empty) = match map.get_mut(*first) {
        Some(child) => {
            let removed = remove_at(child, rest);
            let now_empty = child.is_null() || child.as_object().is_some_and(|m| m.is_empty());
            (removed, now_empty)
        }
        None => (false, false),
    };
    if now_empty {
        map.remove(*first);
    }
    removed
}
