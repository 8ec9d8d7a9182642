use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SyncState;
use crate::clock::{Calendar, Clock};
use crate::config::SyncConfig;
use crate::date_key::CacheWindow;
use crate::error::{Result, SyncError};
use crate::repository::{EntitySync, SyncRange, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pull,
    Push,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pull => write!(f, "pull"),
            Phase::Push => write!(f, "push"),
        }
    }
}

/// Drives pull-then-push runs over every registered entity.
pub struct SyncOrchestrator {
    entities: Vec<Arc<dyn EntitySync>>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    window: CacheWindow,
    pull_window_days: i64,
    push_window_days: i64,
    phase_timeout: Option<Duration>,
    interval: Duration,
    state: watch::Sender<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(entities: Vec<Arc<dyn EntitySync>>, config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            entities,
            clock,
            calendar: config.calendar(),
            window: config.cache_window(),
            pull_window_days: config.pull_window_days,
            push_window_days: config.push_window_days,
            phase_timeout: config.phase_timeout(),
            interval: config.sync_interval(),
            state,
        }
    }

    /// Current state (polling accessor).
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Return to `Idle` from `Completed` or `Failed`. A running sync is left
    /// alone. Returns whether the state changed.
    pub fn reset(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            SyncState::Completed(_) | SyncState::Failed(_) => {
                *state = SyncState::Idle;
                true
            }
            SyncState::Idle | SyncState::Syncing => false,
        })
    }

    /// Pull then push for one user.
    pub async fn full_sync(&self, user_id: &str) -> Result<SyncReport> {
        self.full_sync_with_cancel(user_id, &CancellationToken::new()).await
    }

    /// Like [`full_sync`](Self::full_sync), aborting with
    /// [`SyncError::Cancelled`] as soon as `cancel` fires.
    pub async fn full_sync_with_cancel(&self, user_id: &str, cancel: &CancellationToken) -> Result<SyncReport> {
        let claimed = self.state.send_if_modified(|state| {
            if state.is_syncing() {
                false
            } else {
                *state = SyncState::Syncing;
                true
            }
        });
        if !claimed {
            debug!(user_id, "Sync request rejected, another run is active");
            return Err(SyncError::SyncInProgress);
        }

        info!(user_id, "Sync started");
        let result = self.run(user_id, cancel).await;
        match &result {
            Ok(report) => {
                info!(
                    user_id,
                    pulled = report.pulled,
                    pushed = report.pushed,
                    deleted = report.deleted,
                    "Sync completed"
                );
                self.state.send_replace(SyncState::Completed(*report));
            }
            Err(e) => {
                warn!(user_id, error = %e, "Sync failed");
                self.state.send_replace(SyncState::Failed(e.clone()));
            }
        }
        result
    }

    /// Sync changes since `since`.
    ///
    /// `since` is accepted for API stability but does not narrow the scope
    /// yet: this runs a full sync.
    pub async fn incremental_sync(&self, user_id: &str, since: DateTime<Utc>) -> Result<SyncReport> {
        debug!(user_id, since = %since, "Incremental sync runs as a full sync");
        self.full_sync(user_id).await
    }

    async fn run(&self, user_id: &str, cancel: &CancellationToken) -> Result<SyncReport> {
        let today = self.calendar.today(self.clock.as_ref());
        let (_, window_end) = self.window.bounds(today);

        let pull_range = SyncRange::trailing(today, self.pull_window_days, window_end);
        let mut report = self.run_phase(Phase::Pull, user_id, pull_range, cancel).await?;

        let push_range = SyncRange::trailing(today, self.push_window_days, window_end);
        report += self.run_phase(Phase::Push, user_id, push_range, cancel).await?;
        Ok(report)
    }

    /// Run one phase over every entity concurrently and wait for all of
    /// them. Every failure is logged; the first one (in entity order) is
    /// returned.
    async fn run_phase(
        &self,
        phase: Phase,
        user_id: &str,
        range: SyncRange,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        debug!(user_id, %phase, start = %range.start, end = %range.end, "Sync phase started");

        let tasks = self.entities.iter().map(|entity| async move {
            let result = match phase {
                Phase::Pull => entity.sync_from_cloud(user_id, range).await,
                Phase::Push => entity.sync_to_cloud(user_id, range).await,
            };
            if let Err(ref e) = result {
                error!(user_id, entity = entity.entity(), %phase, error = %e, "Entity sync failed");
            }
            result
        });
        let joined = join_all(tasks);

        let bounded = async {
            match self.phase_timeout {
                Some(limit) => tokio::time::timeout(limit, joined)
                    .await
                    .map_err(|_| SyncError::Timeout(format!("{} phase exceeded {:?}", phase, limit))),
                None => Ok(joined.await),
            }
        };

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            results = bounded => results?,
        };

        let mut report = SyncReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(partial) => report += partial,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Run a full sync on every tick of the configured interval until
    /// `cancel` fires. Ticks that land on an active run are skipped.
    pub fn spawn_periodic(self: Arc<Self>, user_id: String, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(user_id = %user_id, interval_secs = self.interval.as_secs(), "Periodic sync started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(user_id = %user_id, "Periodic sync stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.full_sync_with_cancel(&user_id, &cancel).await {
                            Ok(_) => {}
                            Err(SyncError::SyncInProgress) => debug!("Periodic tick skipped, sync already running"),
                            Err(e) => debug!(error = %e, "Periodic sync run failed"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted entity recording how often each phase ran.
    #[derive(Default)]
    struct FakeEntity {
        pull_error: Option<SyncError>,
        push_error: Option<SyncError>,
        delay: Option<Duration>,
        pulls: AtomicUsize,
        pushes: AtomicUsize,
    }

    #[async_trait]
    impl EntitySync for FakeEntity {
        fn entity(&self) -> &'static str {
            "fake"
        }

        async fn sync_from_cloud(&self, _user_id: &str, _range: SyncRange) -> Result<SyncReport> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.pulls.fetch_add(1, Ordering::SeqCst);
            match &self.pull_error {
                Some(e) => Err(e.clone()),
                None => Ok(SyncReport::pulled(1)),
            }
        }

        async fn sync_to_cloud(&self, _user_id: &str, _range: SyncRange) -> Result<SyncReport> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            match &self.push_error {
                Some(e) => Err(e.clone()),
                None => Ok(SyncReport::pushed(2)),
            }
        }
    }

    fn orchestrator(entities: Vec<Arc<FakeEntity>>, config: SyncConfig) -> SyncOrchestrator {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()));
        let entities = entities
            .into_iter()
            .map(|e| e as Arc<dyn EntitySync>)
            .collect();
        SyncOrchestrator::new(entities, &config, clock)
    }

    #[tokio::test]
    async fn test_successful_run_sums_reports() {
        let a = Arc::new(FakeEntity::default());
        let b = Arc::new(FakeEntity::default());
        let sync = orchestrator(vec![a.clone(), b.clone()], SyncConfig::default());

        let report = sync.full_sync("u1").await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                pulled: 2,
                pushed: 4,
                deleted: 0
            }
        );
        assert_eq!(sync.state(), SyncState::Completed(report));
        assert!(sync.reset());
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.reset());
    }

    #[tokio::test]
    async fn test_pull_failure_skips_push_but_runs_siblings() {
        let failing = Arc::new(FakeEntity {
            pull_error: Some(SyncError::Network("down".into())),
            ..FakeEntity::default()
        });
        let healthy = Arc::new(FakeEntity::default());
        let sync = orchestrator(vec![failing.clone(), healthy.clone()], SyncConfig::default());

        let err = sync.full_sync("u1").await.unwrap_err();
        assert_eq!(err, SyncError::Network("down".into()));
        assert_eq!(sync.state(), SyncState::Failed(err));
        assert_eq!(healthy.pulls.load(Ordering::SeqCst), 1);
        assert_eq!(failing.pushes.load(Ordering::SeqCst), 0);
        assert_eq!(healthy.pushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_push_failure_fails_run() {
        let entity = Arc::new(FakeEntity {
            push_error: Some(SyncError::Store("disk full".into())),
            ..FakeEntity::default()
        });
        let sync = orchestrator(vec![entity.clone()], SyncConfig::default());
        let err = sync.full_sync("u1").await.unwrap_err();
        assert_eq!(err, SyncError::Store("disk full".into()));
        assert_eq!(entity.pulls.load(Ordering::SeqCst), 1);
        assert!(matches!(sync.state(), SyncState::Failed(_)));

        // a failed run does not block the next trigger
        assert!(sync.full_sync("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_rejected() {
        let slow = Arc::new(FakeEntity {
            delay: Some(Duration::from_millis(100)),
            ..FakeEntity::default()
        });
        let sync = orchestrator(vec![slow.clone()], SyncConfig::default());

        let (first, second) = tokio::join!(sync.full_sync("u1"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sync.full_sync("u1").await
        });
        assert!(first.is_ok());
        assert_eq!(second.unwrap_err(), SyncError::SyncInProgress);
        assert_eq!(slow.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_marks_failed() {
        let slow = Arc::new(FakeEntity {
            delay: Some(Duration::from_secs(5)),
            ..FakeEntity::default()
        });
        let sync = orchestrator(vec![slow.clone()], SyncConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let (result, _) = tokio::join!(sync.full_sync_with_cancel("u1", &cancel), async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert_eq!(result.unwrap_err(), SyncError::Cancelled);
        assert_eq!(sync.state(), SyncState::Failed(SyncError::Cancelled));
        assert_eq!(slow.pushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_phase_timeout() {
        let slow = Arc::new(FakeEntity {
            delay: Some(Duration::from_secs(5)),
            ..FakeEntity::default()
        });
        let config = SyncConfig {
            phase_timeout_secs: Some(0),
            ..SyncConfig::default()
        };
        let sync = orchestrator(vec![slow], config);
        let err = sync.full_sync("u1").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_state_receiver_sees_transitions() {
        let sync = orchestrator(vec![Arc::new(FakeEntity::default())], SyncConfig::default());
        let mut rx = sync.subscribe_state();
        assert_eq!(*rx.borrow(), SyncState::Idle);
        sync.full_sync("u1").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(matches!(*rx.borrow_and_update(), SyncState::Completed(_)));
    }

    #[tokio::test]
    async fn test_incremental_runs_full_sync() {
        let entity = Arc::new(FakeEntity::default());
        let sync = orchestrator(vec![entity.clone()], SyncConfig::default());
        sync.incremental_sync("u1", Utc::now()).await.unwrap();
        assert_eq!(entity.pulls.load(Ordering::SeqCst), 1);
        assert_eq!(entity.pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_periodic_runs_until_cancelled() {
        let entity = Arc::new(FakeEntity::default());
        let config = SyncConfig {
            sync_interval_secs: 1,
            ..SyncConfig::default()
        };
        let sync = Arc::new(orchestrator(vec![entity.clone()], config));
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&sync).spawn_periodic("u1".into(), cancel.clone());

        // the first tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(entity.pulls.load(Ordering::SeqCst), 1);
    }
}
