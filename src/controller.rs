//! ServiceController - capability interface over the container engine
//!
//! The orchestrator never shells out to Docker directly; everything it needs
//! from the runtime ("start/stop/rebuild service X", image tagging, database
//! dump/restore) goes through this trait so the rollback logic is testable
//! with a fake controller instead of a real engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use crate::errors::{OrchestratorError, OrchestratorResult};

/// Runtime state of one named service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Exited,
    Missing,
}

#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Start services; an empty slice means all of them.
    async fn up(&self, services: &[String]) -> OrchestratorResult<()>;

    async fn stop(&self, services: &[String]) -> OrchestratorResult<()>;

    async fn restart(&self, services: &[String]) -> OrchestratorResult<()>;

    async fn rebuild(&self, services: &[String], no_cache: bool) -> OrchestratorResult<()>;

    /// Stop and remove everything, optionally including volumes.
    async fn down(&self, remove_volumes: bool) -> OrchestratorResult<()>;

    async fn service_states(&self) -> OrchestratorResult<BTreeMap<String, ServiceState>>;

    /// Whether the compose/service configuration is structurally valid.
    async fn validate_config(&self) -> OrchestratorResult<bool>;

    /// Current image reference of a service, if it has one.
    async fn image_tag(&self, service: &str) -> OrchestratorResult<Option<String>>;

    /// Tag a service's current image under `tag` so it can be restored later.
    async fn tag_image(&self, service: &str, tag: &str) -> OrchestratorResult<()>;

    /// Re-point a service's image at a previously created tag.
    /// Returns `false` when no such tag exists.
    async fn restore_image(&self, service: &str, tag: &str) -> OrchestratorResult<bool>;

    async fn logs(&self, service: &str, tail: usize) -> OrchestratorResult<String>;

    async fn dump_database(&self, out: &Path) -> OrchestratorResult<()>;

    async fn restore_database(&self, dump: &Path) -> OrchestratorResult<()>;
}

/// Production controller shelling out to `docker compose` / `docker`.
pub struct ComposeController {
    project_root: PathBuf,
    db_service: String,
    db_user: String,
    db_name: String,
    command_timeout: Duration,
}

impl ComposeController {
    pub fn new(project_root: PathBuf, db_service: impl Into<String>) -> Self {
        Self {
            project_root,
            db_service: db_service.into(),
            db_user: "postgres".to_string(),
            db_name: "postgres".to_string(),
            command_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_database(mut self, user: impl Into<String>, name: impl Into<String>) -> Self {
        self.db_user = user.into();
        self.db_name = name.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    #[instrument(skip(self, args))]
    async fn run(&self, program: &str, args: &[&str]) -> OrchestratorResult<String> {
        trace!("running {program} {}", args.join(" "));

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::ControllerFailure(format!("{program}: {e}")))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::ControllerFailure(format!(
                    "{program} {} timed out after {:?}",
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| OrchestratorError::ControllerFailure(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::ControllerFailure(format!(
                "{program} {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn compose(&self, args: &[&str]) -> OrchestratorResult<String> {
        let mut full = vec!["compose"];
        full.extend_from_slice(args);
        self.run("docker", &full).await
    }
}

/// Repository part of an image reference, with the tag stripped.
///
/// A colon only separates the tag when nothing after it is a path
/// component, so `registry:5000/app` stays intact while
/// `registry:5000/app:latest` loses `:latest`.
fn image_repo(reference: &str) -> &str {
    match reference.rfind(':') {
        Some(idx) if !reference[idx..].contains('/') => &reference[..idx],
        _ => reference,
    }
}

#[async_trait]
impl ServiceController for ComposeController {
    async fn up(&self, services: &[String]) -> OrchestratorResult<()> {
        let mut args = vec!["up", "-d"];
        args.extend(services.iter().map(String::as_str));
        self.compose(&args).await.map(|_| ())
    }

    async fn stop(&self, services: &[String]) -> OrchestratorResult<()> {
        let mut args = vec!["stop"];
        args.extend(services.iter().map(String::as_str));
        self.compose(&args).await.map(|_| ())
    }

    async fn restart(&self, services: &[String]) -> OrchestratorResult<()> {
        let mut args = vec!["restart"];
        args.extend(services.iter().map(String::as_str));
        self.compose(&args).await.map(|_| ())
    }

    async fn rebuild(&self, services: &[String], no_cache: bool) -> OrchestratorResult<()> {
        let mut args = vec!["build"];
        if no_cache {
            args.push("--no-cache");
        }
        args.extend(services.iter().map(String::as_str));
        self.compose(&args).await.map(|_| ())
    }

    async fn down(&self, remove_volumes: bool) -> OrchestratorResult<()> {
        let mut args = vec!["down", "--remove-orphans"];
        if remove_volumes {
            args.push("--volumes");
        }
        self.compose(&args).await.map(|_| ())
    }

    async fn service_states(&self) -> OrchestratorResult<BTreeMap<String, ServiceState>> {
        // `ps --all --format json` emits one JSON object per line.
        let output = self.compose(&["ps", "--all", "--format", "json"]).await?;

        let mut states = BTreeMap::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let entry: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| OrchestratorError::ControllerFailure(format!("bad ps output: {e}")))?;

            let Some(service) = entry.get("Service").and_then(|v| v.as_str()) else {
                continue;
            };
            let state = match entry.get("State").and_then(|v| v.as_str()) {
                Some("running") => ServiceState::Running,
                Some(_) => ServiceState::Exited,
                None => ServiceState::Missing,
            };
            states.insert(service.to_string(), state);
        }

        debug!("service states: {states:?}");
        Ok(states)
    }

    async fn validate_config(&self) -> OrchestratorResult<bool> {
        // `config -q` exits non-zero on a structurally invalid compose file;
        // that is a validation result here, not a controller failure.
        match self.compose(&["config", "-q"]).await {
            Ok(_) => Ok(true),
            Err(OrchestratorError::ControllerFailure(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn image_tag(&self, service: &str) -> OrchestratorResult<Option<String>> {
        let output = self
            .compose(&["images", service, "--format", "json"])
            .await?;

        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let entry: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                OrchestratorError::ControllerFailure(format!("bad images output: {e}"))
            })?;
            if let (Some(repo), Some(tag)) = (
                entry.get("Repository").and_then(|v| v.as_str()),
                entry.get("Tag").and_then(|v| v.as_str()),
            ) {
                return Ok(Some(format!("{repo}:{tag}")));
            }
        }

        Ok(None)
    }

    async fn tag_image(&self, service: &str, tag: &str) -> OrchestratorResult<()> {
        let Some(current) = self.image_tag(service).await? else {
            return Err(OrchestratorError::ControllerFailure(format!(
                "service '{service}' has no image to tag"
            )));
        };
        let repo = image_repo(&current);
        self.run("docker", &["tag", &current, &format!("{repo}:{tag}")])
            .await
            .map(|_| ())
    }

    async fn restore_image(&self, service: &str, tag: &str) -> OrchestratorResult<bool> {
        let Some(current) = self.image_tag(service).await? else {
            return Ok(false);
        };
        let repo = image_repo(&current);
        let backup = format!("{repo}:{tag}");

        // Does the backup tag exist at all?
        let inspect = self
            .run("docker", &["image", "inspect", &backup, "--format", "ok"])
            .await;
        if inspect.is_err() {
            return Ok(false);
        }

        self.run("docker", &["tag", &backup, &current]).await?;
        Ok(true)
    }

    async fn logs(&self, service: &str, tail: usize) -> OrchestratorResult<String> {
        let tail = tail.to_string();
        self.compose(&["logs", "--no-color", "--tail", &tail, service])
            .await
    }

    async fn dump_database(&self, out: &Path) -> OrchestratorResult<()> {
        let dump = self
            .compose(&[
                "exec",
                "-T",
                &self.db_service,
                "pg_dump",
                "-U",
                &self.db_user,
                self.db_name.as_str(),
            ])
            .await?;
        tokio::fs::write(out, dump).await?;
        Ok(())
    }

    async fn restore_database(&self, dump: &Path) -> OrchestratorResult<()> {
        let sql = tokio::fs::read(dump).await?;

        let mut child = Command::new("docker")
            .args([
                "compose",
                "exec",
                "-T",
                &self.db_service,
                "psql",
                "-U",
                &self.db_user,
                self.db_name.as_str(),
            ])
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::ControllerFailure(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&sql)
                .await
                .map_err(|e| OrchestratorError::ControllerFailure(e.to_string()))?;
        }

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::ControllerFailure("database restore timed out".to_string())
            })?
            .map_err(|e| OrchestratorError::ControllerFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(OrchestratorError::ControllerFailure(format!(
                "psql restore exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}
