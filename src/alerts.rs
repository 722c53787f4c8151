//! AlertDispatcher - durable alert log plus webhook delivery
//!
//! Every alert is appended to the local log file first; sink delivery happens
//! after and its failures are logged but never propagated to the caller.

use std::path::PathBuf;

use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::AlertConfig;
use crate::{AlertEvent, AlertLevel, Outcome, RollbackAttempt, RollbackLevel};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
    webhook: Option<String>,
    log_path: PathBuf,
}

impl Dispatcher {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            client: Client::new(),
            webhook: config.webhook.clone(),
            log_path: config.log_path.clone(),
        }
    }

    #[instrument(skip(self, event), fields(level = %event.level))]
    pub async fn send(&self, event: &AlertEvent) {
        self.append_log(event);

        let Some(webhook) = &self.webhook else {
            return;
        };

        let payload = json!({
            "level": event.level,
            "message": event.message,
            "context": event.context,
            "timestamp": event.timestamp.to_rfc3339(),
        });

        match self.client.post(webhook).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
            }
        }
    }

    /// One JSON line per event; append-only.
    fn append_log(&self, event: &AlertEvent) {
        let append = || -> std::io::Result<()> {
            use std::io::Write;

            if let Some(parent) = self.log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            let line = serde_json::to_string(event)?;
            writeln!(file, "{line}")
        };

        if let Err(e) = append() {
            warn!("failed to append alert to {}: {e}", self.log_path.display());
        }
    }

    pub async fn degraded(&self, overall: &str, consecutive: u32) {
        self.send(&AlertEvent::warning(
            format!("system {overall} ({consecutive} consecutive failures)"),
            json!({ "overall": overall, "consecutive_failures": consecutive }),
        ))
        .await;
    }

    pub async fn recovered(&self, after_failures: u32) {
        self.send(&AlertEvent::info(
            format!("system recovered after {after_failures} failed checks"),
            json!({ "consecutive_failures": after_failures }),
        ))
        .await;
    }

    pub async fn escalation(&self, level: RollbackLevel, attempt: &RollbackAttempt) {
        self.send(&AlertEvent::warning(
            format!("rollback level '{level}' did not restore health, escalating"),
            json!({ "level": level, "attempt": attempt }),
        ))
        .await;
    }

    /// A shutdown cut the attempt short. Worth a warning, but nobody needs
    /// to be paged for an operator-initiated stop.
    pub async fn attempt_interrupted(&self, attempt: &RollbackAttempt) {
        self.send(&AlertEvent::warning(
            format!("rollback {} interrupted by shutdown", attempt.id),
            json!({ "attempt": attempt }),
        ))
        .await;
    }

    pub async fn attempt_finished(&self, attempt: &RollbackAttempt) {
        let event = match attempt.outcome {
            Some(Outcome::Succeeded) => AlertEvent::info(
                format!("rollback {} succeeded", attempt.id),
                json!({ "attempt": attempt }),
            ),
            _ => AlertEvent::critical(
                format!(
                    "rollback {} exhausted all levels, manual intervention required",
                    attempt.id
                ),
                json!({ "attempt": attempt }),
            ),
        };
        self.send(&event).await;
    }
}
