use std::path::PathBuf;

use tracing::trace;

use crate::util;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Services to probe, in order. The database/storage service should come
    /// first: its dependents are meaningless if it is down.
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    pub backup: BackupConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default = "default_incident_root")]
    pub incident_root: PathBuf,

    #[serde(default)]
    pub alert: AlertConfig,
}

impl Config {
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Extra attempts after the first failure
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fixed delay between attempts, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Whether an unreachable result makes the whole system unhealthy
    #[serde(default = "default_required")]
    pub required: bool,

    /// Accepted HTTP status codes (any 2xx if unset)
    pub expected_status: Option<Vec<u16>>,

    /// Regex the response body must match
    pub body_pattern: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Poll interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Consecutive failures before a rollback is triggered
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_true")]
    pub rollback_enabled: bool,

    #[serde(default = "default_true")]
    pub performance_check_enabled: bool,

    /// Seconds to wait after a remediation restart before verifying
    #[serde(default = "default_startup_grace")]
    pub startup_grace: u64,

    /// Seconds to wait after a full-system restore before verifying
    #[serde(default = "default_full_startup_grace")]
    pub full_startup_grace: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            failure_threshold: default_failure_threshold(),
            rollback_enabled: true,
            performance_check_enabled: true,
            startup_grace: default_startup_grace(),
            full_startup_grace: default_full_startup_grace(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f32,

    #[serde(default = "default_memory_percent")]
    pub memory_percent: f32,

    #[serde(default = "default_disk_percent")]
    pub disk_percent: f32,

    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Maximum tolerated share of non-healthy snapshots in the history ring
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_percent(),
            memory_percent: default_memory_percent(),
            disk_percent: default_disk_percent(),
            max_latency_ms: default_max_latency_ms(),
            max_error_rate: default_max_error_rate(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackupConfig {
    /// Directory holding per-backup subdirectories and the last-known-good pointer
    pub root: PathBuf,

    /// Number of most recent backups to keep
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Source tree that gets archived and restored
    pub project_root: PathBuf,

    /// Media directory, archived separately (optional)
    #[serde(default)]
    pub media_dir: Option<PathBuf>,

    /// Configuration files/directories, relative to the project root
    #[serde(default)]
    pub config_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseConfig {
    /// Compose service that hosts the database
    #[serde(default = "default_db_service")]
    pub service: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default = "default_db_name")]
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            service: default_db_service(),
            user: default_db_user(),
            name: default_db_name(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertConfig {
    /// Webhook sink (optional; alerts are always logged locally)
    #[serde(default)]
    pub webhook: Option<String>,

    /// Append-only alert/rollback log
    #[serde(default = "default_alert_log")]
    pub log_path: PathBuf,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook: None,
            log_path: default_alert_log(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    2
}

fn default_required() -> bool {
    true
}

fn default_check_interval() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_startup_grace() -> u64 {
    30
}

fn default_full_startup_grace() -> u64 {
    120
}

fn default_cpu_percent() -> f32 {
    80.0
}

fn default_memory_percent() -> f32 {
    90.0
}

fn default_disk_percent() -> f32 {
    90.0
}

fn default_max_latency_ms() -> u64 {
    2000
}

fn default_max_error_rate() -> f32 {
    0.5
}

fn default_retention() -> usize {
    10
}

fn default_db_service() -> String {
    String::from("db")
}

fn default_db_user() -> String {
    String::from("postgres")
}

fn default_db_name() -> String {
    String::from("postgres")
}

fn default_incident_root() -> PathBuf {
    PathBuf::from("./incidents")
}

fn default_alert_log() -> PathBuf {
    PathBuf::from("./alerts.log")
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let mut config: Config = serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))?;
    apply_env_overrides(&mut config);
    trace!("loaded config: {config:?}");
    Ok(config)
}

/// Environment variables win over file values.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(interval) = util::check_interval_override() {
        config.monitor.check_interval = interval;
    }
    if let Some(threshold) = util::failure_threshold_override() {
        config.monitor.failure_threshold = threshold;
    }
    if let Some(enabled) = util::rollback_enabled_override() {
        config.monitor.rollback_enabled = enabled;
    }
    if let Some(enabled) = util::performance_check_enabled_override() {
        config.monitor.performance_check_enabled = enabled;
    }
    if let Some(webhook) = util::alert_webhook_override() {
        config.alert.webhook = Some(webhook);
    }
}
