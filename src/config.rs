//! Monitor configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "PROPERTY_MONITOR_CONFIG";

/// Registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Root of the per-user state tree (None = no user location).
    pub user_root: Option<PathBuf>,

    /// Root of the system state tree.
    /// Default: /run/state
    pub system_root: PathBuf,

    /// Reopen schedule for properties whose file cannot be opened.
    pub backoff: BackoffConfig,

    /// Readiness rate limiting.
    pub rate: RateConfig,

    /// Read buffer sizing.
    pub read: ReadConfig,

    /// Caller-side wait bounds.
    pub client: ClientTimeouts,

    /// How long the error/hangup probe may block, in milliseconds.
    /// Default: 30
    pub probe_timeout_ms: u64,

    /// Minimum spacing between two readiness-driven reads of one property,
    /// in milliseconds.
    /// Default: 25
    pub rearm_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_root: None,
            system_root: PathBuf::from("/run/state"),
            backoff: BackoffConfig::default(),
            rate: RateConfig::default(),
            read: ReadConfig::default(),
            client: ClientTimeouts::default(),
            probe_timeout_ms: 30,
            rearm_delay_ms: 25,
        }
    }
}

impl MonitorConfig {
    /// Config with both state roots set, everything else default.
    pub fn with_roots(user_root: impl Into<PathBuf>, system_root: impl Into<PathBuf>) -> Self {
        Self {
            user_root: Some(user_root.into()),
            system_root: system_root.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Build from the process environment.
    ///
    /// Reads the file named by `PROPERTY_MONITOR_CONFIG` if set. When no
    /// user root is configured it is derived from `XDG_RUNTIME_DIR`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        if config.user_root.is_none() {
            config.user_root =
                std::env::var_os("XDG_RUNTIME_DIR").map(|dir| PathBuf::from(dir).join("state"));
        }
        Ok(config)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(self.rearm_delay_ms)
    }
}

/// Reopen backoff schedule, all values in milliseconds.
///
/// The delay starts at `initial_ms`, doubles until it reaches
/// `doubling_limit_ms`, then grows by `step_ms`, never exceeding `max_ms`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub doubling_limit_ms: u64,
    pub step_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            doubling_limit_ms: 10_000,
            step_ms: 10_000,
            max_ms: 180_000,
        }
    }
}

/// Readiness events tolerated per wall-clock second.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Starting threshold.
    /// Default: 20
    pub initial_max: u32,
    /// Upper bound for the doubled threshold.
    /// Default: 320
    pub cap: u32,
    /// Count at which the counter is reset instead of raising the threshold.
    /// Default: 200
    pub extreme: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            initial_max: 20,
            cap: 320,
            extreme: 200,
        }
    }
}

/// Read buffer sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Extra bytes requested beyond the reported file length.
    /// Default: 31
    pub slack: usize,
    /// Absolute cap on bytes read in one update.
    /// Default: 1MB
    pub max_read: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            slack: 31,
            max_read: 1024 * 1024,
        }
    }
}

/// How long client handles wait for registry replies, in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTimeouts {
    /// Default: 5000
    pub subscribe_ms: u64,
    /// Default: 20000
    pub unsubscribe_ms: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            subscribe_ms: 5_000,
            unsubscribe_ms: 20_000,
        }
    }
}

impl ClientTimeouts {
    pub fn subscribe(&self) -> Duration {
        Duration::from_millis(self.subscribe_ms)
    }

    pub fn unsubscribe(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(
            &path,
            r#"{"system_root": "/tmp/state", "backoff": {"max_ms": 5000}}"#,
        )
        .unwrap();

        let config = MonitorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.system_root, PathBuf::from("/tmp/state"));
        assert_eq!(config.backoff.max_ms, 5000);
        assert_eq!(config.backoff.initial_ms, 100);
        assert_eq!(config.rate.initial_max, 20);
        assert_eq!(config.client.subscribe(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = MonitorConfig::from_json_file(&path);
        assert!(matches!(result, Err(crate::PropertyError::Config(_))));
    }
}
