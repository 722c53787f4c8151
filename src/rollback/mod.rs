//! RollbackOrchestrator - tiered remediation with fallthrough-on-failure
//!
//! State machine over the ordered levels `config → images → code → full`:
//! each level runs its remediation, waits a startup grace period, then
//! verifies via the health source. A healthy verification terminates the
//! attempt; anything else escalates to the next level. When the full-system
//! level fails verification too, the attempt is terminal-failed, a critical
//! alert fires, and the caller is expected to disable further auto-rollback.
//!
//! ```text
//! execute(trigger, level)
//!   │ try_lock ── held? → ConcurrencyConflict
//!   │ incident capture (pre-remediation)
//!   │ resolve Auto start level
//!   ▼
//! [config] ─fail→ [images] ─fail→ [code] ─fail→ [full] ─fail→ ExhaustedEscalation
//!     └──────────────── healthy verification → Succeeded ────────────┘
//! ```

pub mod levels;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::alerts::Dispatcher;
use crate::backup::BackupManager;
use crate::config::MonitorConfig;
use crate::controller::{ServiceController, ServiceState};
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::git::GitRepo;
use crate::health::HealthSource;
use crate::incident::Reporter;
use crate::{Outcome, RequestedLevel, RollbackAttempt, RollbackLevel, RollbackTrigger};

pub struct Orchestrator {
    health: Arc<dyn HealthSource>,
    controller: Arc<dyn ServiceController>,
    git: Arc<dyn GitRepo>,
    backups: Arc<BackupManager>,
    incidents: Arc<Reporter>,
    alerts: Arc<Dispatcher>,
    services: Vec<String>,

    startup_grace: Duration,
    full_startup_grace: Duration,

    /// Global rollback lock: exactly one execution system-wide.
    lock: Mutex<()>,

    cancel: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        health: Arc<dyn HealthSource>,
        controller: Arc<dyn ServiceController>,
        git: Arc<dyn GitRepo>,
        backups: Arc<BackupManager>,
        incidents: Arc<Reporter>,
        alerts: Arc<Dispatcher>,
        services: Vec<String>,
        monitor: &MonitorConfig,
    ) -> Self {
        Self {
            health,
            controller,
            git,
            backups,
            incidents,
            alerts,
            services,
            startup_grace: Duration::from_secs(monitor.startup_grace),
            full_startup_grace: Duration::from_secs(monitor.full_startup_grace),
            lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one rollback attempt.
    ///
    /// Returns the terminal attempt on success, `ConcurrencyConflict` if a
    /// rollback is already in flight, and `ExhaustedEscalation` when every
    /// level failed verification.
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        trigger: RollbackTrigger,
        requested: RequestedLevel,
        target_rev: Option<&str>,
    ) -> OrchestratorResult<RollbackAttempt> {
        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| OrchestratorError::ConcurrencyConflict)?;

        let mut attempt = RollbackAttempt::new(trigger, requested);
        info!("rollback {} triggered by {trigger} at level {requested}", attempt.id);

        // Diagnostics must reflect the pre-remediation state.
        let incident = self.incidents.report(&trigger.to_string()).await;
        attempt.incident_id = Some(incident.id.clone());

        let start = match requested {
            RequestedLevel::At(level) => level,
            RequestedLevel::Auto => self.detect_start_level().await,
        };
        info!("rollback {} starting at level '{start}'", attempt.id);

        for level in RollbackLevel::ascending_from(start) {
            attempt.executed_levels.push(level);

            if let Err(e) = self.remediate(level, target_rev).await {
                warn!("remediation '{level}' failed: {e}");
            }

            self.grace_wait(level).await;

            if self.verify().await {
                attempt.finish(Outcome::Succeeded);
                info!("rollback {} succeeded at level '{level}'", attempt.id);
                self.alerts.attempt_finished(&attempt).await;
                return Ok(attempt);
            }

            if self.cancel.is_cancelled() {
                attempt.finish(Outcome::Failed);
                warn!("rollback {} interrupted by shutdown", attempt.id);
                self.alerts.attempt_interrupted(&attempt).await;
                return Ok(attempt);
            }

            warn!("level '{level}' did not restore health");
            self.alerts.escalation(level, &attempt).await;
        }

        attempt.finish(Outcome::Failed);
        error!("rollback {} exhausted all levels", attempt.id);
        self.alerts.attempt_finished(&attempt).await;
        Err(OrchestratorError::ExhaustedEscalation)
    }

    /// Best-effort heuristic for the Auto starting level.
    ///
    /// Coarse by design: a healthy-but-slow system can be misclassified as
    /// needing an images rollback. Treated as a starting point, not a
    /// guarantee; the escalation loop corrects a starting level that was too
    /// optimistic.
    async fn detect_start_level(&self) -> RollbackLevel {
        match self.controller.validate_config().await {
            Ok(false) => return RollbackLevel::Config,
            Ok(true) => {}
            Err(e) => {
                warn!("could not validate config ({e}), assuming full rollback");
                return RollbackLevel::FullSystem;
            }
        }

        let states = match self.controller.service_states().await {
            Ok(states) => states,
            Err(e) => {
                warn!("could not read service states ({e}), assuming full rollback");
                return RollbackLevel::FullSystem;
            }
        };

        if states.is_empty() {
            return RollbackLevel::FullSystem;
        }

        if states.values().all(|s| *s == ServiceState::Running) {
            // Everything is up, yet we were triggered: the running images are
            // suspect.
            RollbackLevel::Images
        } else {
            // Services refuse to start; the source tree is suspect.
            RollbackLevel::Code
        }
    }

    async fn verify(&self) -> bool {
        match self.health.current().await {
            Ok(status) => status.is_healthy(),
            Err(e) => {
                warn!("verification probe failed: {e}");
                false
            }
        }
    }

    /// Bounded startup wait, responsive to cancellation.
    async fn grace_wait(&self, level: RollbackLevel) {
        let grace = if level == RollbackLevel::FullSystem {
            self.full_startup_grace
        } else {
            self.startup_grace
        };

        tokio::select! {
            _ = tokio::time::sleep(grace) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
