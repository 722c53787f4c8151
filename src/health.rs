//! HealthAggregator - one system-wide health status per poll cycle
//!
//! Probes every configured service (concurrently, results merged by name) and
//! classifies the system:
//!
//! ```text
//! any required service unreachable              → Unhealthy
//! resource / latency / error-rate threshold hit → Degraded
//! otherwise                                     → Healthy
//! ```
//!
//! Pure read aside from persisting the latest snapshot for other components
//! and pushing it into a bounded in-memory ring used for trend checks.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::config::{ServiceConfig, Thresholds};
use crate::errors::OrchestratorResult;
use crate::probe::Probe;
use crate::{HealthStatus, Overall, ResourceUsage};

/// Capacity of the snapshot ring used for the error-rate signal.
const HISTORY_CAP: usize = 20;

/// Source of the current system health.
///
/// The aggregator is the production implementation; tests script one to drive
/// the monitor and orchestrator deterministically.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn current(&self) -> OrchestratorResult<HealthStatus>;
}

pub struct Aggregator {
    services: Vec<ServiceConfig>,
    thresholds: Thresholds,
    probe: Probe,

    /// Where the latest snapshot is written (skipped if unset)
    snapshot_path: Option<PathBuf>,

    /// Ring of recent overall classifications
    history: Mutex<VecDeque<Overall>>,

    /// Consecutive non-healthy polls, surfaced in the snapshot
    streak: AtomicU32,
}

impl Aggregator {
    pub fn new(services: Vec<ServiceConfig>, thresholds: Thresholds) -> Self {
        Self {
            services,
            thresholds,
            probe: Probe::new(),
            snapshot_path: None,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            streak: AtomicU32::new(0),
        }
    }

    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    /// Probe all services and classify the system.
    #[instrument(skip(self))]
    pub async fn check_all(&self) -> HealthStatus {
        let probes = self.services.iter().map(|service| self.probe.check(service));
        let results = futures::future::join_all(probes).await;

        let mut services = BTreeMap::new();
        for health in results {
            services.insert(health.name.clone(), health);
        }

        let overall = self.classify(&services).await;
        debug!("system health: {overall}");

        let consecutive_failures = if overall == Overall::Healthy {
            self.streak.store(0, Ordering::Relaxed);
            0
        } else {
            self.streak.fetch_add(1, Ordering::Relaxed) + 1
        };

        let status = HealthStatus {
            timestamp: Utc::now(),
            overall,
            services,
            consecutive_failures,
        };

        self.remember(overall);
        self.persist_snapshot(&status);

        status
    }

    async fn classify(&self, services: &BTreeMap<String, crate::ServiceHealth>) -> Overall {
        let required_down = self.services.iter().any(|config| {
            config.required
                && services
                    .get(&config.name)
                    .is_none_or(|health| !health.reachable)
        });
        if required_down {
            return Overall::Unhealthy;
        }

        let slow_probe = services
            .values()
            .filter_map(|health| health.latency_ms)
            .any(|latency| latency > self.thresholds.max_latency_ms);
        if slow_probe {
            return Overall::Degraded;
        }

        if self.error_rate() > self.thresholds.max_error_rate {
            return Overall::Degraded;
        }

        let usage = sample_resources().await;
        if usage.cpu_percent > self.thresholds.cpu_percent
            || usage.memory_percent > self.thresholds.memory_percent
            || usage.disk_percent > self.thresholds.disk_percent
        {
            return Overall::Degraded;
        }

        Overall::Healthy
    }

    /// Share of unhealthy snapshots in the history ring.
    ///
    /// Only hard failures count. A degraded verdict must not feed back into
    /// the rate that produced it, or the ring can never recover once the rate
    /// is breached.
    fn error_rate(&self) -> f32 {
        let history = self.history.lock().expect("health history lock poisoned");
        if history.is_empty() {
            return 0.0;
        }
        let failures = history.iter().filter(|o| **o == Overall::Unhealthy).count();
        failures as f32 / history.len() as f32
    }

    fn remember(&self, overall: Overall) {
        let mut history = self.history.lock().expect("health history lock poisoned");
        if history.len() == HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(overall);
    }

    fn persist_snapshot(&self, status: &HealthStatus) {
        let Some(path) = &self.snapshot_path else {
            return;
        };

        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(status)?;
            std::fs::write(path, json)
        };

        if let Err(e) = write() {
            warn!("failed to persist health snapshot to {}: {e}", path.display());
        }
    }
}

#[async_trait]
impl HealthSource for Aggregator {
    async fn current(&self) -> OrchestratorResult<HealthStatus> {
        Ok(self.check_all().await)
    }
}

/// Sample CPU, memory, and disk usage.
///
/// CPU usage needs two refreshes spaced by sysinfo's minimum interval.
pub async fn sample_resources() -> ResourceUsage {
    use sysinfo::{Disks, System};

    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    tokio::time::sleep(Duration::from_millis(
        sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.as_millis() as u64,
    ))
    .await;
    sys.refresh_cpu_usage();

    let memory_percent = if sys.total_memory() > 0 {
        sys.used_memory() as f32 / sys.total_memory() as f32 * 100.0
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = disks
        .iter()
        .filter(|disk| disk.total_space() > 0)
        .map(|disk| {
            let used = disk.total_space() - disk.available_space();
            used as f32 / disk.total_space() as f32 * 100.0
        })
        .fold(0.0_f32, f32::max);

    ResourceUsage {
        cpu_percent: sys.global_cpu_usage(),
        memory_percent,
        disk_percent,
    }
}
