//! Git operations used by the code-level rollback and the backup manifest
//!
//! Kept behind a trait for the same reason as the service controller: the
//! orchestrator's escalation logic should be testable without a real checkout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use crate::errors::{OrchestratorError, OrchestratorResult};

#[async_trait]
pub trait GitRepo: Send + Sync {
    async fn current_commit(&self) -> OrchestratorResult<String>;

    async fn current_branch(&self) -> OrchestratorResult<String>;

    /// Create a branch at HEAD without switching to it.
    async fn create_branch(&self, name: &str) -> OrchestratorResult<()>;

    async fn tag(&self, name: &str) -> OrchestratorResult<()>;

    /// Stash uncommitted changes, including untracked files.
    async fn stash(&self) -> OrchestratorResult<()>;

    async fn hard_reset(&self, rev: &str) -> OrchestratorResult<()>;

    /// Most recent `deploy-*` tag, if any deployment has been marked good.
    async fn latest_deploy_tag(&self) -> OrchestratorResult<Option<String>>;

    /// Short human-readable state (branch, commit, dirty files) for incidents.
    async fn status_summary(&self) -> OrchestratorResult<String>;
}

pub struct CliGit {
    workdir: PathBuf,
    command_timeout: Duration,
}

impl CliGit {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            command_timeout: Duration::from_secs(120),
        }
    }

    async fn git(&self, args: &[&str]) -> OrchestratorResult<String> {
        trace!("running git {}", args.join(" "));

        let child = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::GitFailure(e.to_string()))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::GitFailure(format!("git {} timed out", args.join(" ")))
            })?
            .map_err(|e| OrchestratorError::GitFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(OrchestratorError::GitFailure(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitRepo for CliGit {
    async fn current_commit(&self) -> OrchestratorResult<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn current_branch(&self) -> OrchestratorResult<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn create_branch(&self, name: &str) -> OrchestratorResult<()> {
        self.git(&["branch", name]).await.map(|_| ())
    }

    async fn tag(&self, name: &str) -> OrchestratorResult<()> {
        self.git(&["tag", name]).await.map(|_| ())
    }

    async fn stash(&self) -> OrchestratorResult<()> {
        self.git(&["stash", "push", "--include-untracked"])
            .await
            .map(|_| ())
    }

    async fn hard_reset(&self, rev: &str) -> OrchestratorResult<()> {
        self.git(&["reset", "--hard", rev]).await.map(|_| ())
    }

    async fn latest_deploy_tag(&self) -> OrchestratorResult<Option<String>> {
        let tags = self
            .git(&["tag", "--list", "deploy-*", "--sort=-creatordate"])
            .await?;
        Ok(tags.lines().next().map(str::to_string))
    }

    async fn status_summary(&self) -> OrchestratorResult<String> {
        let branch = self.current_branch().await?;
        let commit = self.current_commit().await?;
        let dirty = self.git(&["status", "--porcelain"]).await?;

        Ok(format!(
            "branch: {branch}\ncommit: {commit}\ndirty files:\n{dirty}"
        ))
    }
}
