//! ContinuousMonitor - the self-healing control loop
//!
//! One long-lived actor polls the health aggregator on an interval and
//! tracks two independent consecutive-failure counters:
//!
//! ```text
//! Unhealthy (service unreachable)      → health counter
//! Degraded (resource/latency breach)   → performance counter
//! Healthy                              → both reset (+ recovery alert)
//! ```
//!
//! Reaching the failure threshold invokes the rollback orchestrator with the
//! matching trigger and resets that counter regardless of outcome, so the
//! same breach is not retried in a tight loop. An exhausted escalation
//! disables auto-rollback for the remainder of the process. The loop itself
//! never dies on a failed poll; it ticks until cancelled.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::alerts::Dispatcher;
use crate::config::MonitorConfig;
use crate::errors::OrchestratorError;
use crate::health::HealthSource;
use crate::rollback::Orchestrator;
use crate::{Overall, RequestedLevel, RollbackTrigger};

/// Commands that can be sent to the monitor actor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run one poll cycle immediately (bypassing the interval timer)
    TickNow {
        respond_to: oneshot::Sender<Overall>,
    },

    /// Read the current counters
    GetState {
        respond_to: oneshot::Sender<MonitorState>,
    },

    /// Gracefully shut down the monitor
    Shutdown,
}

/// Observable monitor state, mainly for tests and the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    pub health_failures: u32,
    pub perf_failures: u32,
    pub auto_rollback_disabled: bool,
}

pub struct MonitorActor {
    health: Arc<dyn HealthSource>,
    orchestrator: Arc<Orchestrator>,
    alerts: Arc<Dispatcher>,
    config: MonitorConfig,
    command_rx: mpsc::Receiver<MonitorCommand>,
    cancel: CancellationToken,

    health_failures: u32,
    perf_failures: u32,

    /// Total failed checks since the system was last healthy. Unlike the
    /// threshold counters this survives a rollback trigger, so the recovery
    /// alert still fires on the healthy tick that follows a successful
    /// rollback.
    failures_since_healthy: u32,

    /// Flipped permanently after an exhausted escalation
    auto_rollback_disabled: bool,
}

impl MonitorActor {
    pub fn new(
        health: Arc<dyn HealthSource>,
        orchestrator: Arc<Orchestrator>,
        alerts: Arc<Dispatcher>,
        config: MonitorConfig,
        command_rx: mpsc::Receiver<MonitorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            health,
            orchestrator,
            alerts,
            config,
            command_rx,
            cancel,
            health_failures: 0,
            perf_failures: 0,
            failures_since_healthy: 0,
            auto_rollback_disabled: false,
        }
    }

    /// Run the actor's main loop until cancelled or shut down.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting continuous monitor (interval {}s, threshold {})",
            self.config.check_interval, self.config.failure_threshold
        );

        let mut ticker = interval(Duration::from_secs(self.config.check_interval.max(1)));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested, stopping monitor");
                    break;
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::TickNow { respond_to } => {
                            let overall = self.tick().await;
                            let _ = respond_to.send(overall);
                        }

                        MonitorCommand::GetState { respond_to } => {
                            let _ = respond_to.send(MonitorState {
                                health_failures: self.health_failures,
                                perf_failures: self.perf_failures,
                                auto_rollback_disabled: self.auto_rollback_disabled,
                            });
                        }

                        MonitorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("continuous monitor stopped");
    }

    /// One poll cycle. A failed aggregator call is skipped, never fatal.
    async fn tick(&mut self) -> Overall {
        let status = match self.health.current().await {
            Ok(status) => status,
            Err(e) => {
                warn!("health poll failed, skipping cycle: {e}");
                return Overall::Unhealthy;
            }
        };

        match status.overall {
            Overall::Healthy => {
                if self.failures_since_healthy > 0 {
                    self.alerts.recovered(self.failures_since_healthy).await;
                }
                self.failures_since_healthy = 0;
                self.health_failures = 0;
                self.perf_failures = 0;
            }

            Overall::Unhealthy => {
                self.failures_since_healthy += 1;
                self.health_failures += 1;
                self.alerts
                    .degraded("unhealthy", self.health_failures)
                    .await;

                if self.health_failures >= self.config.failure_threshold {
                    self.trigger_rollback(RollbackTrigger::HealthFailure).await;
                    self.health_failures = 0;
                }
            }

            Overall::Degraded => {
                if !self.config.performance_check_enabled {
                    debug!("performance checks disabled, ignoring degraded status");
                    return status.overall;
                }

                self.failures_since_healthy += 1;
                self.perf_failures += 1;
                self.alerts.degraded("degraded", self.perf_failures).await;

                if self.perf_failures >= self.config.failure_threshold {
                    self.trigger_rollback(RollbackTrigger::PerformanceRegression)
                        .await;
                    self.perf_failures = 0;
                }
            }
        }

        status.overall
    }

    async fn trigger_rollback(&mut self, trigger: RollbackTrigger) {
        if !self.config.rollback_enabled || self.auto_rollback_disabled {
            warn!("failure threshold reached but auto-rollback is disabled ({trigger})");
            return;
        }

        match self
            .orchestrator
            .execute(trigger, RequestedLevel::Auto, None)
            .await
        {
            Ok(attempt) => {
                debug!("rollback {} finished: {:?}", attempt.id, attempt.outcome);
            }
            Err(OrchestratorError::ConcurrencyConflict) => {
                warn!("rollback already in progress, skipping trigger");
            }
            Err(OrchestratorError::ExhaustedEscalation) => {
                error!("escalation exhausted, disabling auto-rollback for process lifetime");
                self.auto_rollback_disabled = true;
            }
            Err(e) => {
                error!("rollback failed: {e}");
            }
        }
    }
}

/// Handle for controlling the monitor actor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the monitor actor and return a control handle.
    pub fn spawn(
        health: Arc<dyn HealthSource>,
        orchestrator: Arc<Orchestrator>,
        alerts: Arc<Dispatcher>,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = MonitorActor::new(health, orchestrator, alerts, config, cmd_rx, cancel);
        let join = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, join)
    }

    /// Run one poll cycle immediately.
    pub async fn tick_now(&self) -> Option<Overall> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::TickNow { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn state(&self) -> Option<MonitorState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetState { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(MonitorCommand::Shutdown).await;
    }
}
