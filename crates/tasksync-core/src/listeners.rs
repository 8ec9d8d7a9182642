//! Live remote listeners, at most one per `(userId, dateKey)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::date_key::DateKey;
use crate::error::Result;
use crate::remote::{paths, RemoteStore, SnapshotCallback, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListenerKey {
    user_id: String,
    date_key: DateKey,
}

pub struct ListenerRegistry {
    remote: Arc<dyn RemoteStore>,
    handles: Mutex<HashMap<ListenerKey, Subscription>>,
}

impl ListenerRegistry {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<ListenerKey, Subscription>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Listen to the task list of one day. An existing listener for the
    /// same key is disposed before the new one is registered, so callbacks
    /// are never delivered twice for a key.
    pub fn subscribe(&self, user_id: &str, date_key: DateKey, on_update: SnapshotCallback) -> Result<()> {
        let key = ListenerKey {
            user_id: user_id.to_string(),
            date_key,
        };
        let mut handles = self.handles();
        if let Some(previous) = handles.remove(&key) {
            debug!(user_id, %date_key, id = previous.id(), "Replacing existing listener");
            previous.dispose();
        }
        let subscription = self
            .remote
            .subscribe(&paths::tasks_for_day(user_id, date_key), on_update)?;
        debug!(user_id, %date_key, id = subscription.id(), "Listener registered");
        handles.insert(key, subscription);
        Ok(())
    }

    /// Stop listening to one day. Returns whether a listener existed.
    pub fn unsubscribe(&self, user_id: &str, date_key: DateKey) -> bool {
        let key = ListenerKey {
            user_id: user_id.to_string(),
            date_key,
        };
        match self.handles().remove(&key) {
            Some(subscription) => {
                subscription.dispose();
                true
            }
            None => false,
        }
    }

    /// Tear down every listener belonging to one user.
    pub fn unsubscribe_user(&self, user_id: &str) -> usize {
        let mut handles = self.handles();
        let keys: Vec<ListenerKey> = handles
            .keys()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(subscription) = handles.remove(key) {
                subscription.dispose();
            }
        }
        keys.len()
    }

    /// Tear down every tracked listener. Called on sign-out.
    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<Subscription> = self.handles().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for subscription in drained {
            subscription.dispose();
        }
        info!(count, "All listeners removed");
        count
    }

    pub fn is_subscribed(&self, user_id: &str, date_key: DateKey) -> bool {
        self.handles().contains_key(&ListenerKey {
            user_id: user_id.to_string(),
            date_key,
        })
    }

    pub fn active_count(&self) -> usize {
        self.handles().len()
    }
}
