use std::path::PathBuf;
use std::time::Duration;

use devbox_common::config::{optional, parse_or};
use devbox_common::{ConfigError, EnvSource};
use devbox_providers::metadata::DEFAULT_METADATA_URL;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3001";
pub const DEFAULT_BACKEND_LOG_FILE: &str = "/var/log/pocketable-backend.log";
pub const DEFAULT_ACTIVITY_FILE: &str = "/var/lib/daytona/last-activity.json";
pub const DEFAULT_MONITOR_LOG_FILE: &str = "/var/log/auto-stop-monitor.log";

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    pub idle_threshold_minutes: u64,
    pub check_interval: Duration,
    pub grace_period: Duration,
    pub backend_url: String,
    pub backend_log_file: PathBuf,
    pub activity_file: PathBuf,
    /// Extra log sink next to stdout. `None` when `MONITOR_LOG_FILE` is set to an empty string.
    pub log_file: Option<PathBuf>,
    pub metadata_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_threshold_minutes: 120,
            check_interval: Duration::from_secs(300),
            grace_period: Duration::from_secs(60),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_log_file: PathBuf::from(DEFAULT_BACKEND_LOG_FILE),
            activity_file: PathBuf::from(DEFAULT_ACTIVITY_FILE),
            log_file: Some(PathBuf::from(DEFAULT_MONITOR_LOG_FILE)),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let log_file = match env.get("MONITOR_LOG_FILE") {
            None => defaults.log_file,
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(PathBuf::from(raw.trim())),
        };
        let idle_threshold_minutes =
            parse_or(env, "IDLE_THRESHOLD_MINUTES", defaults.idle_threshold_minutes)?;
        if threshold_from_minutes(idle_threshold_minutes).is_none() {
            return Err(ConfigError::Invalid {
                key: "IDLE_THRESHOLD_MINUTES".to_string(),
                value: idle_threshold_minutes.to_string(),
                reason: "threshold out of range".to_string(),
            });
        }
        let check_interval_secs =
            parse_or(env, "CHECK_INTERVAL_SECONDS", defaults.check_interval.as_secs())?;
        if check_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "CHECK_INTERVAL_SECONDS".to_string(),
                value: "0".to_string(),
                reason: "interval must be positive".to_string(),
            });
        }
        Ok(Self {
            idle_threshold_minutes,
            check_interval: Duration::from_secs(check_interval_secs),
            grace_period: Duration::from_secs(parse_or(
                env,
                "GRACE_PERIOD_SECONDS",
                defaults.grace_period.as_secs(),
            )?),
            backend_url: optional(env, "BACKEND_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.backend_url),
            backend_log_file: optional(env, "BACKEND_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.backend_log_file),
            activity_file: optional(env, "ACTIVITY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.activity_file),
            log_file,
            metadata_url: optional(env, "METADATA_URL").unwrap_or(defaults.metadata_url),
        })
    }

    /// Saturates at `chrono::Duration::MAX` for values `from_env` would have rejected.
    pub fn idle_threshold(&self) -> chrono::Duration {
        threshold_from_minutes(self.idle_threshold_minutes).unwrap_or(chrono::Duration::MAX)
    }
}

fn threshold_from_minutes(minutes: u64) -> Option<chrono::Duration> {
    i64::try_from(minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
}
