//! IncidentReporter - pre-remediation diagnostic capture
//!
//! Called before any destructive step so the post-mortem record reflects the
//! system as it was when the trigger fired. Each diagnostic category is
//! gathered independently; a category that cannot be captured is logged and
//! left out. Partial incidents are valid and better than none.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use crate::controller::ServiceController;
use crate::git::GitRepo;
use crate::health::sample_resources;
use crate::{Diagnostics, Incident};

/// Lines of per-service log tail captured into each incident.
const LOG_TAIL: usize = 100;

pub struct Reporter {
    root: PathBuf,
    controller: Arc<dyn ServiceController>,
    git: Arc<dyn GitRepo>,
    services: Vec<String>,
}

impl Reporter {
    pub fn new(
        root: PathBuf,
        controller: Arc<dyn ServiceController>,
        git: Arc<dyn GitRepo>,
        services: Vec<String>,
    ) -> Self {
        Self {
            root,
            controller,
            git,
            services,
        }
    }

    /// Capture a diagnostic snapshot and persist it under a fresh incident id.
    #[instrument(skip(self))]
    pub async fn report(&self, trigger: &str) -> Incident {
        let created_at = Utc::now();
        let id = format!("inc-{}", created_at.format("%Y%m%d-%H%M%S%3f"));

        let diagnostics = Diagnostics {
            container_status: self.capture_container_status().await,
            resource_usage: Some(sample_resources().await),
            recent_logs: self.capture_logs().await,
            git_state: self.capture_git_state().await,
        };

        let incident = Incident {
            id: id.clone(),
            trigger: trigger.to_string(),
            created_at,
            diagnostics,
        };

        self.persist(&incident);
        incident
    }

    async fn capture_container_status(&self) -> Option<String> {
        match self.controller.service_states().await {
            Ok(states) => Some(
                states
                    .iter()
                    .map(|(name, state)| format!("{name}: {state:?}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => {
                warn!("could not capture container status: {e}");
                None
            }
        }
    }

    async fn capture_logs(&self) -> Option<BTreeMap<String, String>> {
        let mut logs = BTreeMap::new();
        for service in &self.services {
            match self.controller.logs(service, LOG_TAIL).await {
                Ok(tail) => {
                    logs.insert(service.clone(), tail);
                }
                Err(e) => {
                    warn!("could not capture logs for {service}: {e}");
                }
            }
        }

        if logs.is_empty() { None } else { Some(logs) }
    }

    async fn capture_git_state(&self) -> Option<String> {
        match self.git.status_summary().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("could not capture git state: {e}");
                None
            }
        }
    }

    /// Write the incident directory. A write failure downgrades to a warning;
    /// the in-memory incident is still returned to the caller.
    fn persist(&self, incident: &Incident) {
        let write = || -> std::io::Result<()> {
            let dir = self.root.join(&incident.id);
            std::fs::create_dir_all(&dir)?;

            let json = serde_json::to_string_pretty(incident)?;
            std::fs::write(dir.join("incident.json"), json)?;

            if let Some(logs) = &incident.diagnostics.recent_logs {
                for (service, tail) in logs {
                    std::fs::write(dir.join(format!("{service}.log")), tail)?;
                }
            }
            Ok(())
        };

        if let Err(e) = write() {
            warn!("failed to persist incident {}: {e}", incident.id);
        }
    }
}
