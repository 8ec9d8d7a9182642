//! Composition root and sign-in/sign-out lifecycle.
//!
//! [`DataLayer`] builds every shared service once (cache, dedup guard,
//! listener registry, repositories, orchestrator) and hands out `Arc`s.
//! Nothing in the crate is a global; tests build a fresh layer per case.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::assistant::TaskAssistant;
use crate::cache::EntityCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::dedup::OperationDedupGuard;
use crate::error::{Result, SyncError};
use crate::listeners::ListenerRegistry;
use crate::local::LocalStore;
use crate::remote::RemoteStore;
use crate::repository::{CompletionRepository, EntitySync, ProfileRepository, RepoContext, TaskRepository};
use crate::sync::SyncOrchestrator;

/// Session changes reported by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(String),
    SignedOut,
}

struct PeriodicSync {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct DataLayer {
    config: SyncConfig,
    local: Arc<LocalStore>,
    cache: Arc<EntityCache>,
    listeners: Arc<ListenerRegistry>,
    profiles: Arc<ProfileRepository>,
    tasks: Arc<TaskRepository>,
    completions: Arc<CompletionRepository>,
    sync: Arc<SyncOrchestrator>,
    current_user: Mutex<Option<String>>,
    periodic: Mutex<Option<PeriodicSync>>,
}

impl DataLayer {
    pub fn new(config: SyncConfig, local: LocalStore, remote: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        let calendar = config.calendar();
        let local = Arc::new(local);
        let ctx = RepoContext {
            local: Arc::clone(&local),
            remote: Arc::clone(&remote),
            dedup: Arc::new(OperationDedupGuard::new()),
            clock: Arc::clone(&clock),
            calendar,
        };
        let cache = Arc::new(EntityCache::new(
            config.cache_window(),
            config.retention(),
            calendar,
            Arc::clone(&clock),
        ));
        let listeners = Arc::new(ListenerRegistry::new(remote));

        let profiles = Arc::new(ProfileRepository::new(ctx.clone()));
        let tasks = Arc::new(TaskRepository::new(
            ctx.clone(),
            Arc::clone(&cache),
            Arc::clone(&listeners),
        ));
        let completions = Arc::new(CompletionRepository::new(ctx));

        let entities = vec![
            Arc::clone(&profiles) as Arc<dyn EntitySync>,
            Arc::clone(&tasks) as Arc<dyn EntitySync>,
            Arc::clone(&completions) as Arc<dyn EntitySync>,
        ];
        let sync = Arc::new(SyncOrchestrator::new(entities, &config, clock));

        Self {
            config,
            local,
            cache,
            listeners,
            profiles,
            tasks,
            completions,
            sync,
            current_user: Mutex::new(None),
            periodic: Mutex::new(None),
        }
    }

    /// Build a layer with the JSON store under the configured data
    /// directory and the system clock.
    pub fn open(config: SyncConfig, remote: Arc<dyn RemoteStore>) -> anyhow::Result<Self> {
        let local = LocalStore::new(config.data_dir()?)?;
        Ok(Self::new(config, local, remote, Arc::new(SystemClock)))
    }

    fn user_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.current_user.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn periodic_slot(&self) -> MutexGuard<'_, Option<PeriodicSync>> {
        self.periodic.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn profiles(&self) -> &Arc<ProfileRepository> {
        &self.profiles
    }

    pub fn tasks(&self) -> &Arc<TaskRepository> {
        &self.tasks
    }

    pub fn completions(&self) -> &Arc<CompletionRepository> {
        &self.completions
    }

    pub fn sync(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }

    pub fn current_user(&self) -> Option<String> {
        self.user_slot().clone()
    }

    /// The signed-in user, or `NotAllowed` when nobody is signed in.
    pub fn require_user(&self) -> Result<String> {
        self.current_user()
            .ok_or_else(|| SyncError::NotAllowed("no user is signed in".to_string()))
    }

    /// Assistant bound to the signed-in user.
    pub fn assistant(&self) -> Result<TaskAssistant> {
        Ok(TaskAssistant::new(Arc::clone(&self.tasks), self.require_user()?))
    }

    /// React to a session change. Signing in as someone else first signs
    /// the previous user out.
    pub fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SignedIn(user_id) => {
                let previous = self.current_user();
                if previous.as_deref() == Some(user_id.as_str()) {
                    return;
                }
                if previous.is_some() {
                    self.sign_out();
                }
                info!(user_id = %user_id, "User signed in");
                *self.user_slot() = Some(user_id);
            }
            SessionEvent::SignedOut => self.sign_out(),
        }
    }

    fn sign_out(&self) {
        self.stop_periodic_sync();
        let removed = self.listeners.unsubscribe_all();
        if let Some(user_id) = self.user_slot().take() {
            self.cache.clear_user(&user_id);
            info!(user_id = %user_id, listeners = removed, "User signed out");
        }
        self.sync.reset();
    }

    /// Start syncing the signed-in user on the configured interval.
    /// Replaces a periodic sync that is already running.
    pub fn start_periodic_sync(&self) -> Result<()> {
        let user_id = self.require_user()?;
        self.stop_periodic_sync();
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&self.sync).spawn_periodic(user_id, cancel.clone());
        *self.periodic_slot() = Some(PeriodicSync { cancel, handle });
        Ok(())
    }

    /// Stop the periodic sync, if any. Returns whether one was running.
    pub fn stop_periodic_sync(&self) -> bool {
        match self.periodic_slot().take() {
            Some(periodic) => {
                periodic.cancel.cancel();
                debug!(finished = periodic.handle.is_finished(), "Periodic sync cancelled");
                true
            }
            None => false,
        }
    }
}

impl Drop for DataLayer {
    fn drop(&mut self) {
        if let Some(periodic) = self.periodic_slot().take() {
            periodic.cancel.cancel();
        }
    }
}
