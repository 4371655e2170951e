//! On-disk JSON configuration.
//!
//! Mirrors the key set documented for the daemon: peer connection info,
//! thresholds, command hooks, and the ambient sinks (statsd, alert files,
//! state snapshot path). All fields are optional except `remote_conns`,
//! which is required for the daemon to do anything useful.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const WARNING_REPLICATION_TIME_LAG: f64 = 30.0;
pub const MAX_FAILOVER_REPLICATION_TIME_LAG: f64 = 120.0;
pub const REPLICATION_CATCHUP_TIMEOUT: f64 = 300.0;
pub const MISSING_MASTER_FROM_CONFIG_TIMEOUT: f64 = 15.0;
pub const DB_POLL_INTERVAL: f64 = 5.0;
pub const REPLICATION_STATE_CHECK_INTERVAL: f64 = 5.0;
pub const HTTP_PORT: u16 = 15000;
pub const MAINTENANCE_MODE_FILE: &str = "/tmp/pgwarden_maintenance_mode_file";
pub const JSON_STATE_FILE_PATH: &str = "/tmp/pgwarden_state.json";

fn default_db_poll_interval() -> f64 {
    DB_POLL_INTERVAL
}
fn default_replication_state_check_interval() -> f64 {
    REPLICATION_STATE_CHECK_INTERVAL
}
fn default_warning_replication_time_lag() -> f64 {
    WARNING_REPLICATION_TIME_LAG
}
fn default_max_failover_replication_time_lag() -> f64 {
    MAX_FAILOVER_REPLICATION_TIME_LAG
}
fn default_replication_catchup_timeout() -> f64 {
    REPLICATION_CATCHUP_TIMEOUT
}
fn default_missing_master_from_config_timeout() -> f64 {
    MISSING_MASTER_FROM_CONFIG_TIMEOUT
}
fn default_http_port() -> u16 {
    HTTP_PORT
}
fn default_maintenance_mode_file() -> PathBuf {
    PathBuf::from(MAINTENANCE_MODE_FILE)
}
fn default_json_state_file_path() -> PathBuf {
    PathBuf::from(JSON_STATE_FILE_PATH)
}
fn default_alert_file_dir() -> PathBuf {
    PathBuf::from("/tmp")
}
fn default_failover_sleep_time() -> f64 {
    0.0
}

/// Distinguishes an absent `cluster_monitor_health_timeout_seconds` key
/// (apply the default timeout) from an explicit JSON `null` (disable the
/// health check). Plain `Option<f64>` with `#[serde(default)]` can't tell
/// these apart since both deserialize to `None`.
fn deserialize_some<'de, D>(deserializer: D) -> std::result::Result<Option<Option<f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StatsdConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Peers to probe; required for the daemon to do anything.
    #[serde(default)]
    pub remote_conns: HashMap<String, String>,

    /// Observer HTTP endpoints; `/state.json` is appended by the prober.
    #[serde(default)]
    pub observers: HashMap<String, String>,

    /// This node's name, a key in `remote_conns`. Empty means observer-only.
    #[serde(default)]
    pub own_db: Option<String>,

    #[serde(default)]
    pub autofollow: bool,

    #[serde(default)]
    pub primary_conninfo_template: Option<String>,

    #[serde(default)]
    pub pg_data_directory: Option<PathBuf>,
    #[serde(default)]
    pub pg_start_command: Option<String>,
    #[serde(default)]
    pub pg_stop_command: Option<String>,

    #[serde(default)]
    pub failover_command: Option<String>,
    #[serde(default)]
    pub over_warning_limit_command: Option<String>,
    #[serde(default = "default_failover_sleep_time")]
    pub failover_sleep_time: f64,

    #[serde(default)]
    pub known_gone_nodes: Vec<String>,
    #[serde(default)]
    pub never_promote_these_nodes: Vec<String>,

    #[serde(default = "default_db_poll_interval")]
    pub db_poll_interval: f64,
    #[serde(default = "default_replication_state_check_interval")]
    pub replication_state_check_interval: f64,

    #[serde(default = "default_warning_replication_time_lag")]
    pub warning_replication_time_lag: f64,
    #[serde(default = "default_max_failover_replication_time_lag")]
    pub max_failover_replication_time_lag: f64,
    #[serde(default = "default_replication_catchup_timeout")]
    pub replication_catchup_timeout: f64,
    #[serde(default = "default_missing_master_from_config_timeout")]
    pub missing_master_from_config_timeout: f64,

    #[serde(default)]
    pub poll_observers_on_warning_only: bool,

    /// `None` (key absent) means apply the default; `Some(None)` (JSON
    /// `null`) explicitly disables the health check; `Some(Some(secs))` sets
    /// an explicit timeout.
    #[serde(default, deserialize_with = "deserialize_some")]
    pub cluster_monitor_health_timeout_seconds: Option<Option<f64>>,

    #[serde(default = "default_maintenance_mode_file")]
    pub maintenance_mode_file: PathBuf,
    #[serde(default = "default_alert_file_dir")]
    pub alert_file_dir: PathBuf,
    #[serde(default = "default_json_state_file_path")]
    pub json_state_file_path: PathBuf,

    #[serde(default)]
    pub http_address: Option<String>,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub statsd: StatsdConfig,

    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub syslog: bool,
    #[serde(default)]
    pub syslog_address: Option<String>,
    #[serde(default)]
    pub syslog_facility: Option<String>,
}

impl Config {
    /// Reads and parses the JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON
    /// matching the expected shape.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()
    }

    fn validate(mut self) -> Result<Self> {
        if self.warning_replication_time_lag >= self.max_failover_replication_time_lag {
            tracing::warn!(
                warning = self.warning_replication_time_lag,
                failover = self.max_failover_replication_time_lag,
                "warning_replication_time_lag must be < max_failover_replication_time_lag, clamping"
            );
            self.warning_replication_time_lag = self.max_failover_replication_time_lag;
        }
        Ok(self)
    }

    #[must_use]
    pub fn conninfo_for(&self, name: &str) -> Option<&str> {
        self.remote_conns.get(name).map(String::as_str)
    }

    /// DSN for `own_db`, wrapped so it is never accidentally logged.
    #[must_use]
    pub fn own_dsn(&self) -> Option<SecretString> {
        let name = self.own_db.as_ref()?;
        self.conninfo_for(name).map(SecretString::from)
    }
}
