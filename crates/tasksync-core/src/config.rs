//! Data layer configuration.
//!
//! Holds the cache window, the sync windows, the dateKey timezone and the
//! remote endpoint. Stored at `~/.config/tasksync/config.json`; a missing
//! file yields the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Months;
use serde::{Deserialize, Serialize};

use crate::clock::Calendar;
use crate::date_key::CacheWindow;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "tasksync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Months before today that the task cache keeps.
pub const DEFAULT_PAST_MONTHS: u32 = 12;

/// Months after today that the task cache keeps.
pub const DEFAULT_FUTURE_MONTHS: u32 = 3;

/// Age after which a cached day slice is reloaded on read.
pub const DEFAULT_RETENTION_MONTHS: u32 = 1;

/// Trailing days covered by the pull phase.
pub const DEFAULT_PULL_WINDOW_DAYS: i64 = 90;

/// Trailing days covered by the push phase.
pub const DEFAULT_PUSH_WINDOW_DAYS: i64 = 30;

/// HTTP request timeout in seconds for the REST remote.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Interval between periodic syncs.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub past_months: u32,
    pub future_months: u32,
    pub retention_months: u32,
    pub pull_window_days: i64,
    pub push_window_days: i64,
    /// Offset east of UTC for dateKey normalization.
    pub utc_offset_minutes: i32,
    pub request_timeout_secs: u64,
    /// Upper bound on each sync phase. `None` leaves phases unbounded.
    pub phase_timeout_secs: Option<u64>,
    pub sync_interval_secs: u64,
    pub remote_url: Option<String>,
    pub last_user_id: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            past_months: DEFAULT_PAST_MONTHS,
            future_months: DEFAULT_FUTURE_MONTHS,
            retention_months: DEFAULT_RETENTION_MONTHS,
            pull_window_days: DEFAULT_PULL_WINDOW_DAYS,
            push_window_days: DEFAULT_PUSH_WINDOW_DAYS,
            utc_offset_minutes: 0,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            phase_timeout_secs: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            remote_url: None,
            last_user_id: None,
        }
    }
}

impl SyncConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root directory of the on-device JSON store.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("logs"))
    }

    pub fn cache_window(&self) -> CacheWindow {
        CacheWindow::new(self.past_months, self.future_months)
    }

    pub fn calendar(&self) -> Calendar {
        Calendar::from_offset_minutes(self.utc_offset_minutes)
    }

    pub fn retention(&self) -> Months {
        Months::new(self.retention_months)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}
