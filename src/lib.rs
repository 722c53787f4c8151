pub mod alerts;
pub mod backup;
pub mod config;
pub mod controller;
pub mod errors;
pub mod git;
pub mod health;
pub mod incident;
pub mod monitor;
pub mod probe;
pub mod rollback;
pub mod util;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System-wide health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Overall::Healthy => write!(f, "healthy"),
            Overall::Degraded => write!(f, "degraded"),
            Overall::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of probing one service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub http_status: Option<u16>,
    pub last_error: Option<String>,
}

/// One system-wide health snapshot, produced every poll cycle.
///
/// Transient: only the latest snapshot is persisted (for the CLI and other
/// components to read), plus a bounded in-memory ring used for trend checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub overall: Overall,
    pub services: BTreeMap<String, ServiceHealth>,
    pub consecutive_failures: u32,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.overall == Overall::Healthy
    }
}

/// Remediation tiers, least to most destructive.
///
/// The derived `Ord` defines the escalation direction: once a level has been
/// attempted and failed, only strictly greater levels may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackLevel {
    Config,
    Images,
    Code,
    FullSystem,
}

impl RollbackLevel {
    pub const ALL: [RollbackLevel; 4] = [
        RollbackLevel::Config,
        RollbackLevel::Images,
        RollbackLevel::Code,
        RollbackLevel::FullSystem,
    ];

    /// Levels from `start` (inclusive) up to `FullSystem`, in escalation order.
    pub fn ascending_from(start: RollbackLevel) -> impl Iterator<Item = RollbackLevel> {
        Self::ALL.into_iter().filter(move |level| *level >= start)
    }
}

impl fmt::Display for RollbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackLevel::Config => write!(f, "config"),
            RollbackLevel::Images => write!(f, "images"),
            RollbackLevel::Code => write!(f, "code"),
            RollbackLevel::FullSystem => write!(f, "full"),
        }
    }
}

impl FromStr for RollbackLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "config" | "1" => Ok(RollbackLevel::Config),
            "images" | "2" => Ok(RollbackLevel::Images),
            "code" | "3" => Ok(RollbackLevel::Code),
            "full" | "full-system" | "4" => Ok(RollbackLevel::FullSystem),
            other => Err(format!("unknown rollback level: {other}")),
        }
    }
}

/// Either an explicit starting level or heuristic detection at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedLevel {
    Auto,
    At(RollbackLevel),
}

impl fmt::Display for RequestedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedLevel::Auto => write!(f, "auto"),
            RequestedLevel::At(level) => write!(f, "{level}"),
        }
    }
}

impl FromStr for RequestedLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(RequestedLevel::Auto);
        }
        s.parse().map(RequestedLevel::At)
    }
}

/// What caused a rollback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackTrigger {
    Manual,
    Auto,
    Build,
    HealthFailure,
    PerformanceRegression,
}

impl fmt::Display for RollbackTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackTrigger::Manual => write!(f, "manual"),
            RollbackTrigger::Auto => write!(f, "auto"),
            RollbackTrigger::Build => write!(f, "build"),
            RollbackTrigger::HealthFailure => write!(f, "health-failure"),
            RollbackTrigger::PerformanceRegression => write!(f, "performance-regression"),
        }
    }
}

impl FromStr for RollbackTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(RollbackTrigger::Manual),
            "auto" => Ok(RollbackTrigger::Auto),
            "build" => Ok(RollbackTrigger::Build),
            "health-failure" => Ok(RollbackTrigger::HealthFailure),
            "performance-regression" => Ok(RollbackTrigger::PerformanceRegression),
            other => Err(format!("unknown rollback trigger: {other}")),
        }
    }
}

/// Terminal outcome of a rollback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// Record of one orchestrator execution.
///
/// Created at trigger time, mutated as each level is attempted, immutable once
/// `outcome` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackAttempt {
    pub id: String,
    pub trigger: RollbackTrigger,
    pub requested: RequestedLevel,
    pub executed_levels: Vec<RollbackLevel>,
    pub outcome: Option<Outcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub incident_id: Option<String>,
}

impl RollbackAttempt {
    pub fn new(trigger: RollbackTrigger, requested: RequestedLevel) -> Self {
        let started_at = Utc::now();
        Self {
            id: format!("rb-{}", started_at.format("%Y%m%d-%H%M%S%3f")),
            trigger,
            requested,
            executed_levels: Vec::new(),
            outcome: None,
            started_at,
            finished_at: None,
            incident_id: None,
        }
    }

    pub fn finish(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }
}

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Manual,
    Scheduled,
    PreDeployment,
    Critical,
    Config,
    Success,
}

impl BackupKind {
    pub fn slug(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Scheduled => "scheduled",
            BackupKind::PreDeployment => "pre-deployment",
            BackupKind::Critical => "critical",
            BackupKind::Config => "config",
            BackupKind::Success => "success",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(BackupKind::Manual),
            "scheduled" => Ok(BackupKind::Scheduled),
            "pre-deployment" | "predeployment" => Ok(BackupKind::PreDeployment),
            "critical" => Ok(BackupKind::Critical),
            "config" => Ok(BackupKind::Config),
            "success" => Ok(BackupKind::Success),
            other => Err(format!("unknown backup kind: {other}")),
        }
    }
}

/// Integrity manifest written alongside every backup's artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub kind: BackupKind,
    pub git_commit: Option<String>,
    pub git_branch: Option<String>,
    pub image_tags: BTreeMap<String, String>,
    pub artifact_sizes: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub verified: bool,
}

/// Point-in-time resource readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
}

/// Diagnostic snapshot attached to an incident.
///
/// Every category is optional: a category that cannot be captured is left out
/// rather than aborting incident creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub container_status: Option<String>,
    pub resource_usage: Option<ResourceUsage>,
    pub recent_logs: Option<BTreeMap<String, String>>,
    pub git_state: Option<String>,
}

/// Immutable diagnostic record captured at the start of a rollback attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub trigger: String,
    pub created_at: DateTime<Utc>,
    pub diagnostics: Diagnostics,
}

/// Severity of an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// One structured alert, appended to the durable log and pushed to sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub message: String,
    pub context: serde_json::Value,
}

impl AlertEvent {
    pub fn new(level: AlertLevel, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
        }
    }

    pub fn info(message: impl Into<String>, context: serde_json::Value) -> Self {
        Self::new(AlertLevel::Info, message, context)
    }

    pub fn warning(message: impl Into<String>, context: serde_json::Value) -> Self {
        Self::new(AlertLevel::Warning, message, context)
    }

    pub fn critical(message: impl Into<String>, context: serde_json::Value) -> Self {
        Self::new(AlertLevel::Critical, message, context)
    }
}
