//! End-to-end scenarios through the public `DataLayer` surface, backed by
//! the in-memory remote store and a manual clock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use tasksync_core::remote::{codec, paths};
use tasksync_core::{
    Calendar, DataLayer, DateKey, LocalStore, ManualClock, MemoryRemoteStore, RemoteStore, SessionEvent, SyncConfig,
    SyncError, SyncState, TaskCategory, TaskDraft,
};

const USER: &str = "user-1";

struct Harness {
    _dir: tempfile::TempDir,
    remote: MemoryRemoteStore,
    clock: Arc<ManualClock>,
    layer: DataLayer,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
}

fn today() -> NaiveDate {
    t0().date_naive()
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryRemoteStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let layer = DataLayer::new(
        SyncConfig::default(),
        LocalStore::new(dir.path().to_path_buf()).unwrap(),
        Arc::new(remote.clone()),
        clock.clone(),
    );
    layer.handle_session_event(SessionEvent::SignedIn(USER.to_string()));
    Harness {
        _dir: dir,
        remote,
        clock,
        layer,
    }
}

fn draft(title: &str, date: NaiveDate, hour: u32) -> TaskDraft {
    TaskDraft::new(title, date, NaiveTime::from_hms_opt(hour, 0, 0).unwrap(), TaskCategory::Fitness)
}

async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(30)).await;
}

#[test]
fn date_key_is_stable_across_the_day() {
    let calendar = Calendar::utc();
    let morning = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
    let night = Utc.with_ymd_and_hms(2026, 10, 19, 23, 59, 59).unwrap();

    let key = DateKey::from_instant(morning, &calendar);
    assert_eq!(key, DateKey::from_instant(night, &calendar));
    assert_eq!(DateKey::from_instant(key.to_instant(&calendar), &calendar), key);
    assert_eq!(DateKey::parse(&key.to_string()).unwrap(), key);
    assert_eq!(key.to_string(), "2026-10-19");
}

#[tokio::test]
async fn concurrent_adds_of_one_task_write_once() {
    let h = harness();
    h.remote.set_write_latency(Some(StdDuration::from_millis(50)));
    let task = draft("Run", today(), 7).into_record("run-1".to_string(), t0());

    let (a, b) = tokio::join!(
        h.layer.tasks().add_task(USER, task.clone()),
        h.layer.tasks().add_task(USER, task.clone()),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(h.remote.write_count(), 1);
    assert_eq!(h.layer.tasks().tasks_for_date(USER, today()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn watching_a_day_twice_keeps_one_listener() {
    let h = harness();
    h.layer.tasks().watch_day(USER, today()).unwrap();
    h.layer.tasks().watch_day(USER, today()).unwrap();

    let path = paths::tasks_for_day(USER, DateKey::from_date(today()));
    assert_eq!(h.remote.active_subscriptions(&path), 1);
    assert_eq!(h.layer.listeners().active_count(), 1);
}

#[tokio::test]
async fn full_sync_keeps_newer_local_edit() {
    let h = harness();
    let local = h.layer.tasks().create_task(USER, draft("Local title", today(), 7)).await.unwrap();

    let mut older = local.clone();
    older.title = "Remote title".to_string();
    older.updated_at = local.updated_at - Duration::seconds(1);
    let path = paths::task(USER, older.date_key(), &older.id);
    h.remote
        .write(&path, codec::encode_task(&older, &Calendar::utc()).unwrap())
        .await
        .unwrap();

    h.layer.sync().full_sync(USER).await.unwrap();

    let found = h.layer.tasks().find_task(USER, &local.id).unwrap().unwrap();
    assert_eq!(found.title, "Local title");
    let on_remote = codec::decode_task(&path, &local.id, h.remote.peek(&path).unwrap(), &Calendar::utc()).unwrap();
    assert_eq!(on_remote.title, "Local title");
    assert!(matches!(h.layer.sync().state(), SyncState::Completed(_)));
}

#[tokio::test]
async fn pull_failure_fails_the_run_before_pushing() {
    let h = harness();
    h.remote.set_offline(true);
    let task = h.layer.tasks().create_task(USER, draft("Offline", today(), 7)).await;
    assert!(task.unwrap_err().is_transport());
    let writes_before = h.remote.write_count();

    let err = h.layer.sync().full_sync(USER).await.unwrap_err();
    assert!(err.is_transport());
    assert!(matches!(h.layer.sync().state(), SyncState::Failed(_)));
    assert_eq!(h.remote.write_count(), writes_before);

    // Back online the pending task goes up on the next run
    h.remote.set_offline(false);
    let report = h.layer.sync().full_sync(USER).await.unwrap();
    assert_eq!(report.pushed, 1);
}

#[tokio::test]
async fn overlapping_sync_is_rejected() {
    let h = harness();
    h.remote.set_write_latency(Some(StdDuration::from_millis(50)));
    h.remote.set_offline(true);
    let _ = h.layer.tasks().create_task(USER, draft("Pending", today(), 7)).await;
    h.remote.set_offline(false);

    let (first, second) = tokio::join!(h.layer.sync().full_sync(USER), async {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        h.layer.sync().full_sync(USER).await
    });
    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::SyncInProgress)));
}

#[tokio::test]
async fn day_outside_the_window_is_never_cached() {
    let h = harness();
    let long_ago = today().checked_sub_months(Months::new(13)).unwrap();
    h.layer.tasks().create_task(USER, draft("Old", long_ago, 7)).await.unwrap();

    let tasks = h.layer.tasks().tasks_for_date(USER, long_ago).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(h.layer.cache().slice_len(USER, DateKey::from_date(long_ago)), 0);
    assert!(!h.layer.cache().is_cached(USER, DateKey::from_date(long_ago)));
}

#[tokio::test]
async fn stale_listener_event_does_not_resurrect_a_deleted_task() {
    let h = harness();
    let task = h.layer.tasks().create_task(USER, draft("Run", today(), 7)).await.unwrap();
    let day_path = paths::tasks_for_day(USER, task.date_key());
    let stale = h.remote.peek(&day_path);
    assert!(stale.is_some());

    h.layer.tasks().watch_day(USER, today()).unwrap();
    settle().await;
    h.clock.advance(Duration::minutes(1));
    assert!(h.layer.tasks().delete_task(USER, &task.id).await.unwrap());

    h.remote.deliver(&day_path, stale);
    settle().await;

    assert!(h.layer.tasks().tasks_for_date(USER, today()).await.unwrap().is_empty());
    assert!(h.layer.tasks().find_task(USER, &task.id).unwrap().is_none());
}

#[tokio::test]
async fn signing_out_releases_everything() {
    let h = harness();
    h.layer.tasks().tasks_for_date(USER, today()).await.unwrap();
    h.layer.tasks().watch_day(USER, today()).unwrap();
    h.layer.start_periodic_sync().unwrap();

    h.layer.handle_session_event(SessionEvent::SignedOut);
    assert_eq!(h.remote.total_subscriptions(), 0);
    assert!(h.layer.cache().cached_days(USER).is_empty());
    assert!(!h.layer.stop_periodic_sync());
    assert_eq!(h.layer.sync().state(), SyncState::Idle);
}

#[tokio::test]
async fn task_deleted_on_another_device_stays_deleted() {
    let h = harness();
    let task = h.layer.tasks().create_task(USER, draft("Run", today(), 7)).await.unwrap();
    h.layer.sync().full_sync(USER).await.unwrap();

    let path = paths::task(USER, task.date_key(), &task.id);
    h.remote.delete(&path).await.unwrap();

    let report = h.layer.sync().full_sync(USER).await.unwrap();
    assert_eq!(report.pushed, 0);
    assert!(h.remote.peek(&path).is_none());
    assert!(h.layer.tasks().find_task(USER, &task.id).unwrap().is_none());
    assert!(h.layer.tasks().tasks_for_date(USER, today()).await.unwrap().is_empty());
}
