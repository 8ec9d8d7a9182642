//! tasksync - command-line front end for the planner data layer.
//!
//! Reads and writes go through the same cache, local store and remote
//! store the mobile app uses. Without a configured remote the tool runs
//! local-only and every change waits for the next `sync`.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate, NaiveTime};
use tasksync_core::remote::MemoryRemoteStore;
use tasksync_core::{
    Calendar, Clock, DataLayer, RemoteStore, RestRemoteStore, SessionEvent, SyncConfig, SyncError, SystemClock,
    TaskCategory, TaskDraft, TaskRecord,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

const ENV_REMOTE_URL: &str = "TASKSYNC_REMOTE_URL";
const ENV_AUTH_TOKEN: &str = "TASKSYNC_AUTH_TOKEN";
const ENV_USER: &str = "TASKSYNC_USER";

/// Set to any value to also log to a daily rolling file.
const ENV_LOG_FILE: &str = "TASKSYNC_LOG_FILE";

const LOG_FILE_PREFIX: &str = "tasksync.log";

/// Days shown by `tasks` when no count is given.
const DEFAULT_LIST_DAYS: u32 = 1;

/// Days looked back by `streak` when no count is given.
const DEFAULT_STREAK_DAYS: u32 = 30;

const USAGE: &str = "\
Usage: tasksync [--user <id>] <command> [args]

Commands:
  sync                              pull then push everything
  tasks [YYYY-MM-DD] [days]         list tasks (default: today, 1 day)
  add <title> <YYYY-MM-DD> <HH:MM> [fitness|diet|other]
  done <task-id>                    toggle a task's done flag
  rm <task-id>                      delete a task
  complete <YYYY-MM-DD>             mark a day completed
  streak [days]                     completed days in the last N days
  profile                           show the stored profile
  watch [YYYY-MM-DD]                follow a day live and sync periodically
";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr filtered by `RUST_LOG` (default `warn`). With
/// `TASKSYNC_LOG_FILE` set, a daily rolling file in the log directory gets
/// the same events; the returned guard flushes it on drop.
fn init_tracing(config: &SyncConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(ENV_LOG_FILE).and_then(|_| config.log_dir().ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Build the remote store from the environment or config. Falls back to a
/// local-only store that is permanently offline.
fn build_remote(config: &SyncConfig) -> Result<Arc<dyn RemoteStore>> {
    let url = std::env::var(ENV_REMOTE_URL).ok().or_else(|| config.remote_url.clone());
    match url {
        Some(url) => {
            let store = RestRemoteStore::new(url, config.request_timeout())
                .context("Failed to create remote client")?;
            let store = match std::env::var(ENV_AUTH_TOKEN) {
                Ok(token) => store.with_token(token),
                Err(_) => store,
            };
            Ok(Arc::new(store))
        }
        None => {
            warn!("No remote configured, running local-only");
            let store = MemoryRemoteStore::new();
            store.set_offline(true);
            Ok(Arc::new(store))
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("Invalid time '{}', expected HH:MM", s))
}

/// Today on the configured calendar, which may differ from the host zone.
fn calendar_today(calendar: &Calendar, clock: &dyn Clock) -> NaiveDate {
    calendar.today(clock)
}

/// First day of a `days`-long window ending on `end`.
fn window_start(end: NaiveDate, days: u32) -> Result<NaiveDate> {
    match end.checked_sub_days(Days::new(u64::from(days.max(1) - 1))) {
        Some(start) => Ok(start),
        None => bail!("Day count {} reaches past the start of the calendar", days),
    }
}

fn print_task(task: &TaskRecord) {
    let check = if task.is_done { "x" } else { " " };
    println!(
        "[{}] {} {} {:<8} {}  ({})",
        check,
        task.date,
        task.time.format("%H:%M"),
        task.category,
        task.title,
        task.id
    );
}

/// Report a write whose remote half failed but whose local half landed.
fn saved_locally<T>(result: tasksync_core::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transport() => {
            eprintln!("Saved locally; remote unavailable ({}). Run `tasksync sync` later.", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = SyncConfig::load().context("Failed to load config")?;
    let _log_guard = init_tracing(&config);

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut user = std::env::var(ENV_USER).ok();
    if let Some(pos) = args.iter().position(|a| a == "--user") {
        if pos + 1 >= args.len() {
            bail!("--user needs a value");
        }
        user = Some(args.remove(pos + 1));
        args.remove(pos);
    }
    let user = match user.or_else(|| config.last_user_id.clone()) {
        Some(user) => user,
        None => bail!("No user given. Pass --user <id> or set {}", ENV_USER),
    };

    let Some(command) = args.first().cloned() else {
        eprint!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let remote = build_remote(&config)?;
    let layer = DataLayer::open(config.clone(), remote)?;
    layer.handle_session_event(SessionEvent::SignedIn(user.clone()));
    info!(user_id = %user, command = %command, "tasksync starting");

    let result = run(&layer, &user, &command, rest).await;

    if config.last_user_id.as_deref() != Some(user.as_str()) {
        let mut updated = config;
        updated.last_user_id = Some(user);
        if let Err(e) = updated.save() {
            warn!(error = %e, "Failed to save config");
        }
    }
    layer.handle_session_event(SessionEvent::SignedOut);
    result
}

async fn run(layer: &DataLayer, user: &str, command: &str, rest: &[String]) -> Result<()> {
    let today = || calendar_today(&layer.config().calendar(), &SystemClock);
    match command {
        "sync" => {
            let report = layer.sync().full_sync(user).await?;
            println!(
                "Sync complete: {} pulled, {} pushed, {} deleted",
                report.pulled, report.pushed, report.deleted
            );
        }
        "tasks" => {
            let date = match rest.first() {
                Some(s) => parse_date(s)?,
                None => today(),
            };
            let days = match rest.get(1) {
                Some(s) => s.parse().with_context(|| format!("Invalid day count '{}'", s))?,
                None => DEFAULT_LIST_DAYS,
            };
            let tasks = layer.assistant()?.query_tasks(date, days, None, None).await?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                print_task(task);
            }
        }
        "add" => {
            let [title, date, time, category @ ..] = rest else {
                bail!("Usage: tasksync add <title> <YYYY-MM-DD> <HH:MM> [fitness|diet|other]");
            };
            let category = category
                .first()
                .map(|c| TaskCategory::from_tag(c))
                .unwrap_or(TaskCategory::Other);
            let mut draft = TaskDraft::new(title.as_str(), parse_date(date)?, parse_time(time)?, category);
            draft.source = Some("cli".to_string());
            if let Some(task) = saved_locally(layer.tasks().create_task(user, draft).await)? {
                print_task(&task);
            }
        }
        "done" => {
            let Some(id) = rest.first() else {
                bail!("Usage: tasksync done <task-id>");
            };
            match saved_locally(layer.tasks().toggle_done(user, id).await)? {
                Some(Some(task)) => print_task(&task),
                Some(None) => bail!("No task with id {}", id),
                None => {}
            }
        }
        "rm" => {
            let Some(id) = rest.first() else {
                bail!("Usage: tasksync rm <task-id>");
            };
            if saved_locally(layer.tasks().delete_task(user, id).await)? == Some(false) {
                bail!("No task with id {}", id);
            }
        }
        "complete" => {
            let date = match rest.first() {
                Some(s) => parse_date(s)?,
                None => today(),
            };
            saved_locally(layer.completions().set_completed(user, date, true).await)?;
        }
        "streak" => {
            let days = match rest.first() {
                Some(s) => s.parse().with_context(|| format!("Invalid day count '{}'", s))?,
                None => DEFAULT_STREAK_DAYS,
            };
            let end = today();
            let start = window_start(end, days)?;
            let done = layer.completions().completed_between(user, start, end)?;
            println!("{} of {} days completed", done.len(), days.max(1));
            for key in done {
                println!("  {}", key);
            }
        }
        "profile" => match layer.profiles().get(user)? {
            Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
            None => println!("No profile stored for {}.", user),
        },
        "watch" => {
            let date = match rest.first() {
                Some(s) => parse_date(s)?,
                None => today(),
            };
            watch(layer, user, date).await?;
        }
        other => {
            eprint!("{}", USAGE);
            bail!("Unknown command '{}'", other);
        }
    }
    Ok(())
}

/// Follow one day until Ctrl-C, printing the list whenever it changes.
async fn watch(layer: &DataLayer, user: &str, date: NaiveDate) -> Result<()> {
    layer.tasks().watch_day(user, date)?;
    layer.start_periodic_sync()?;
    println!("Watching {} (Ctrl-C to stop)", date);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let mut state = layer.sync().subscribe_state();
    let mut last: Option<Vec<TaskRecord>> = None;
    loop {
        let tasks = layer.tasks().tasks_for_date(user, date).await?;
        if last.as_ref() != Some(&tasks) {
            println!("--- {} ---", date);
            for task in &tasks {
                print_task(task);
            }
            last = Some(tasks);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(e) = state.borrow_and_update().error() {
                    if !matches!(e, SyncError::SyncInProgress) {
                        eprintln!("Sync failed: {}", e);
                    }
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
        }
    }

    layer.stop_periodic_sync();
    layer.tasks().unwatch_day(user, date);
    Ok(())
}
