//! Per-level remediation actions
//!
//! Each remediation snapshots what it is about to overwrite before touching
//! it, so a failed rollback never leaves less state behind than it found.

use chrono::Utc;
use tracing::{error, info, warn};

use super::Orchestrator;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::{BackupKind, RollbackLevel};

/// Stable tag the deployment pipeline leaves on the previous good image set.
/// When it is absent the images level falls back to rebuilding from the
/// current tree; rolling the source itself back is the code level's job.
const PREVIOUS_IMAGE_TAG: &str = "previous";

impl Orchestrator {
    pub(crate) async fn remediate(
        &self,
        level: RollbackLevel,
        target_rev: Option<&str>,
    ) -> OrchestratorResult<()> {
        match level {
            RollbackLevel::Config => self.remediate_config().await,
            RollbackLevel::Images => self.remediate_images().await,
            RollbackLevel::Code => self.remediate_code(target_rev).await,
            RollbackLevel::FullSystem => self.remediate_full_system().await,
        }
    }

    /// Snapshot live config, then overwrite it from last-known-good and
    /// restart.
    async fn remediate_config(&self) -> OrchestratorResult<()> {
        self.backups.create(BackupKind::Config, None).await?;

        let known_good = self.backups.latest_known_good()?.ok_or_else(|| {
            OrchestratorError::RemediationFailure {
                level: RollbackLevel::Config,
                reason: "no last-known-good backup to restore config from".to_string(),
            }
        })?;

        info!("restoring config from backup {}", known_good.id);
        self.backups.restore_config(&known_good.id).await?;
        self.controller.restart(&self.services).await
    }

    /// Tag current images as a dated backup, then fall back to the previous
    /// image set (or a rebuild when none exists) and restart.
    async fn remediate_images(&self) -> OrchestratorResult<()> {
        let dated = format!("backup-{}", Utc::now().format("%Y%m%d-%H%M%S"));

        for service in &self.services {
            if let Err(e) = self.controller.tag_image(service, &dated).await {
                warn!("could not tag current image of {service}: {e}");
            }
        }

        let mut restored = 0usize;
        for service in &self.services {
            match self.controller.restore_image(service, PREVIOUS_IMAGE_TAG).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => warn!("image restore failed for {service}: {e}"),
            }
        }

        if restored == 0 {
            info!("no '{PREVIOUS_IMAGE_TAG}' images available, rebuilding instead");
            self.controller.rebuild(&self.services, false).await?;
        }

        self.controller.restart(&self.services).await
    }

    /// Hard-reset the source to a target revision and rebuild without cache.
    /// The pre-reset state is kept on a backup branch and restored if the
    /// rebuild or restart fails.
    async fn remediate_code(&self, target_rev: Option<&str>) -> OrchestratorResult<()> {
        let backup_branch = format!("rollback-backup-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        self.git.create_branch(&backup_branch).await?;

        if let Err(e) = self.git.stash().await {
            warn!("stash before reset failed: {e}");
        }

        let target = match target_rev {
            Some(rev) => rev.to_string(),
            None => self
                .git
                .latest_deploy_tag()
                .await?
                .unwrap_or_else(|| "HEAD~1".to_string()),
        };

        info!("resetting source to {target} (backup on {backup_branch})");
        self.git.hard_reset(&target).await?;

        let result = match self.controller.rebuild(&self.services, true).await {
            Ok(()) => self.controller.restart(&self.services).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("rebuild after reset failed ({e}), restoring {backup_branch}");
            if let Err(restore_err) = self.git.hard_reset(&backup_branch).await {
                error!("could not restore pre-reset state: {restore_err}");
            }
            return Err(OrchestratorError::RemediationFailure {
                level: RollbackLevel::Code,
                reason: e.to_string(),
            });
        }

        Ok(())
    }

    /// Tear everything down and restore the last-known-good backup in full.
    async fn remediate_full_system(&self) -> OrchestratorResult<()> {
        let known_good = self.backups.latest_known_good()?.ok_or_else(|| {
            OrchestratorError::RemediationFailure {
                level: RollbackLevel::FullSystem,
                reason: "no last-known-good backup to restore".to_string(),
            }
        })?;

        info!("full-system restore from backup {}", known_good.id);
        self.controller.down(true).await?;
        self.backups.restore_with(&known_good.id, true).await
    }
}
