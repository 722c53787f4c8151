//! BackupManager - timestamped system snapshots with an integrity manifest
//!
//! Layout under the backup root:
//!
//! ```text
//! <root>/
//!   20260830-101501123-manual/
//!     code.zip  config.zip  database.sql  media.zip  manifest.json
//!   last-known-good.json        <- pointer, atomically swapped
//! ```
//!
//! `last-known-good` is only re-pointed after the new backup verified AND a
//! post-backup health check passed; the swap is write-new-then-rename so the
//! pointer never references a partial backup. Create and restore serialize on
//! one mutex since concurrent writes to the backup root are unsafe.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::BackupConfig;
use crate::controller::ServiceController;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::git::GitRepo;
use crate::health::HealthSource;
use crate::{BackupKind, BackupManifest};

const POINTER_FILE: &str = "last-known-good.json";
const MANIFEST_FILE: &str = "manifest.json";
const CODE_ARCHIVE: &str = "code.zip";
const CONFIG_ARCHIVE: &str = "config.zip";
const MEDIA_ARCHIVE: &str = "media.zip";
const DATABASE_DUMP: &str = "database.sql";

/// Directory names excluded from the code archive wherever they appear.
const CODE_EXCLUDES: [&str; 3] = [".git", "target", "node_modules"];

#[derive(Debug, Serialize, Deserialize)]
struct Pointer {
    id: String,
    updated_at: chrono::DateTime<Utc>,
}

pub struct BackupManager {
    config: BackupConfig,
    controller: Arc<dyn ServiceController>,
    git: Arc<dyn GitRepo>,
    services: Vec<String>,
    lock: Mutex<()>,
}

impl BackupManager {
    pub fn new(
        config: BackupConfig,
        controller: Arc<dyn ServiceController>,
        git: Arc<dyn GitRepo>,
        services: Vec<String>,
    ) -> Self {
        Self {
            config,
            controller,
            git,
            services,
            lock: Mutex::new(()),
        }
    }

    /// Create a new backup. For pre-deployment/success backups a passing
    /// post-backup health check re-points `last-known-good`.
    #[instrument(skip(self, health))]
    pub async fn create(
        &self,
        kind: BackupKind,
        health: Option<&dyn HealthSource>,
    ) -> OrchestratorResult<BackupManifest> {
        let _guard = self.lock.lock().await;

        let created_at = Utc::now();
        let id = format!("{}-{}", created_at.format("%Y%m%d-%H%M%S%3f"), kind.slug());
        let dir = self.config.root.join(&id);
        std::fs::create_dir_all(&dir)?;
        info!("creating {kind} backup {id}");

        let mut artifact_sizes = BTreeMap::new();

        if kind == BackupKind::Config {
            // Config backups carry only the configuration artifact; they exist
            // so the config-level remediation can snapshot before overwriting.
            self.archive_config(&dir, &mut artifact_sizes).await?;
        } else {
            self.archive_code(&dir, &mut artifact_sizes).await?;
            self.archive_config(&dir, &mut artifact_sizes).await?;
            self.dump_database(&dir, &mut artifact_sizes).await;
            self.archive_media(&dir, &mut artifact_sizes).await?;
        }

        // Integrity gate: the primary archive must be openable and listable
        // before this backup is declared valid.
        let primary = dir.join(primary_artifact(kind));
        let entries = archive_entries(&primary).await?;
        if entries == 0 {
            return Err(OrchestratorError::BackupIntegrity(format!(
                "{id}: primary archive is empty"
            )));
        }
        debug!("{id}: primary archive verified ({entries} entries)");

        let manifest = BackupManifest {
            id: id.clone(),
            kind,
            git_commit: self.git.current_commit().await.ok(),
            git_branch: self.git.current_branch().await.ok(),
            image_tags: self.collect_image_tags().await,
            artifact_sizes,
            created_at,
            verified: true,
        };
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        self.enforce_retention();

        if matches!(kind, BackupKind::PreDeployment | BackupKind::Success) {
            self.maybe_repoint(&manifest, health).await;
        }

        Ok(manifest)
    }

    /// Restore a backup by id. Integrity is verified before any destructive
    /// step; the operation is idempotent and never touches the pointer.
    pub async fn restore(&self, id: &str) -> OrchestratorResult<()> {
        self.restore_with(id, false).await
    }

    #[instrument(skip(self))]
    pub async fn restore_with(&self, id: &str, no_cache: bool) -> OrchestratorResult<()> {
        let _guard = self.lock.lock().await;

        let dir = self.config.root.join(id);
        let manifest = self.load_manifest(id)?;
        if !manifest.verified {
            return Err(OrchestratorError::BackupIntegrity(format!(
                "{id}: backup was never verified"
            )));
        }

        // Gate before anything destructive happens.
        let primary = dir.join(primary_artifact(manifest.kind));
        if archive_entries(&primary).await? == 0 {
            return Err(OrchestratorError::BackupIntegrity(format!(
                "{id}: primary archive is empty"
            )));
        }

        info!("restoring backup {id}");
        self.controller.stop(&[]).await?;

        // Dependency order: config, database, media, code, then rebuild.
        self.extract_config(&dir).await?;

        let dump = dir.join(DATABASE_DUMP);
        if dump.is_file() {
            self.controller.restore_database(&dump).await?;
        }

        let media = dir.join(MEDIA_ARCHIVE);
        if let (true, Some(media_dir)) = (media.is_file(), &self.config.media_dir) {
            extract_archive(&media, media_dir).await?;
        }

        let code = dir.join(CODE_ARCHIVE);
        if code.is_file() {
            extract_archive(&code, &self.config.project_root).await?;
        }

        self.controller.rebuild(&[], no_cache).await?;
        self.controller.up(&[]).await?;

        info!("backup {id} restored");
        Ok(())
    }

    /// Extract only the configuration artifact of a backup (used by the
    /// config-level remediation).
    pub async fn restore_config(&self, id: &str) -> OrchestratorResult<()> {
        let _guard = self.lock.lock().await;

        let dir = self.config.root.join(id);
        let archive = dir.join(CONFIG_ARCHIVE);
        if archive_entries(&archive).await? == 0 {
            return Err(OrchestratorError::BackupIntegrity(format!(
                "{id}: config archive is empty"
            )));
        }

        extract_archive(&archive, &self.config.project_root).await
    }

    /// All manifests, newest first.
    pub fn list(&self) -> OrchestratorResult<Vec<BackupManifest>> {
        let mut manifests = Vec::new();
        if !self.config.root.is_dir() {
            return Ok(manifests);
        }

        for entry in std::fs::read_dir(&self.config.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load_manifest(&id) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!("skipping backup {id}: {e}"),
            }
        }

        manifests.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(manifests)
    }

    /// Manifest the `last-known-good` pointer currently references.
    pub fn latest_known_good(&self) -> OrchestratorResult<Option<BackupManifest>> {
        let path = self.config.root.join(POINTER_FILE);
        if !path.is_file() {
            return Ok(None);
        }

        let pointer: Pointer = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        self.load_manifest(&pointer.id).map(Some)
    }

    fn load_manifest(&self, id: &str) -> OrchestratorResult<BackupManifest> {
        let path = self.config.root.join(id).join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|_| {
            OrchestratorError::BackupIntegrity(format!("{id}: manifest missing or unreadable"))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| OrchestratorError::BackupIntegrity(format!("{id}: bad manifest: {e}")))
    }

    async fn archive_code(
        &self,
        dir: &Path,
        sizes: &mut BTreeMap<String, u64>,
    ) -> OrchestratorResult<()> {
        let src = self.config.project_root.clone();
        let dest = dir.join(CODE_ARCHIVE);
        let skip_prefix = self.config.root.clone();

        let size = tokio::task::spawn_blocking(move || {
            zip_tree(&src, &dest, &CODE_EXCLUDES, Some(&skip_prefix))
        })
        .await
        .map_err(join_error)??;

        sizes.insert("code".to_string(), size);
        Ok(())
    }

    async fn archive_config(
        &self,
        dir: &Path,
        sizes: &mut BTreeMap<String, u64>,
    ) -> OrchestratorResult<()> {
        let base = self.config.project_root.clone();
        let paths = self.config.config_paths.clone();
        let dest = dir.join(CONFIG_ARCHIVE);

        let size = tokio::task::spawn_blocking(move || zip_paths(&base, &paths, &dest))
            .await
            .map_err(join_error)??;

        sizes.insert("config".to_string(), size);
        Ok(())
    }

    /// A database that is down must not abort the backup: critical backups are
    /// taken exactly when services are failing.
    async fn dump_database(&self, dir: &Path, sizes: &mut BTreeMap<String, u64>) {
        let dump = dir.join(DATABASE_DUMP);
        match self.controller.dump_database(&dump).await {
            Ok(()) => {
                let size = std::fs::metadata(&dump).map(|m| m.len()).unwrap_or(0);
                sizes.insert("database".to_string(), size);
            }
            Err(e) => warn!("database dump skipped: {e}"),
        }
    }

    async fn archive_media(
        &self,
        dir: &Path,
        sizes: &mut BTreeMap<String, u64>,
    ) -> OrchestratorResult<()> {
        let Some(media_dir) = self.config.media_dir.clone() else {
            return Ok(());
        };
        if !media_dir.is_dir() {
            warn!("media dir {} missing, skipping", media_dir.display());
            return Ok(());
        }

        let dest = dir.join(MEDIA_ARCHIVE);
        let size = tokio::task::spawn_blocking(move || zip_tree(&media_dir, &dest, &[], None))
            .await
            .map_err(join_error)??;

        sizes.insert("media".to_string(), size);
        Ok(())
    }

    async fn extract_config(&self, dir: &Path) -> OrchestratorResult<()> {
        let archive = dir.join(CONFIG_ARCHIVE);
        if !archive.is_file() {
            return Ok(());
        }
        extract_archive(&archive, &self.config.project_root).await
    }

    async fn collect_image_tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        for service in &self.services {
            match self.controller.image_tag(service).await {
                Ok(Some(tag)) => {
                    tags.insert(service.clone(), tag);
                }
                Ok(None) => {}
                Err(e) => warn!("could not read image tag for {service}: {e}"),
            }
        }
        tags
    }

    /// Keep the newest `retention` backups plus whatever the pointer
    /// references; delete the rest.
    fn enforce_retention(&self) {
        let keep_always = match self.latest_known_good() {
            Ok(manifest) => manifest.map(|m| m.id),
            Err(_) => None,
        };

        let Ok(manifests) = self.list() else {
            return;
        };

        for manifest in manifests.iter().skip(self.config.retention) {
            if Some(&manifest.id) == keep_always.as_ref() {
                continue;
            }
            let dir = self.config.root.join(&manifest.id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!("retention: removed backup {}", manifest.id),
                Err(e) => warn!("retention: could not remove {}: {e}", manifest.id),
            }
        }
    }

    async fn maybe_repoint(&self, manifest: &BackupManifest, health: Option<&dyn HealthSource>) {
        let Some(health) = health else {
            return;
        };

        match health.current().await {
            Ok(status) if status.is_healthy() => {
                if let Err(e) = self.write_pointer(&manifest.id) {
                    warn!("could not update last-known-good pointer: {e}");
                } else {
                    info!("last-known-good now points at {}", manifest.id);
                }
            }
            Ok(status) => {
                warn!(
                    "post-backup health check was {}, keeping previous last-known-good",
                    status.overall
                );
            }
            Err(e) => warn!("post-backup health check failed ({e}), keeping previous pointer"),
        }
    }

    /// Write new, then swap. The pointer file is never left half-written.
    fn write_pointer(&self, id: &str) -> OrchestratorResult<()> {
        let pointer = Pointer {
            id: id.to_string(),
            updated_at: Utc::now(),
        };
        let tmp = self.config.root.join(format!("{POINTER_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_string_pretty(&pointer)?)?;
        std::fs::rename(&tmp, self.config.root.join(POINTER_FILE))?;
        Ok(())
    }
}

fn primary_artifact(kind: BackupKind) -> &'static str {
    match kind {
        BackupKind::Config => CONFIG_ARCHIVE,
        _ => CODE_ARCHIVE,
    }
}

fn join_error(e: tokio::task::JoinError) -> OrchestratorError {
    OrchestratorError::Io(std::io::Error::other(e))
}

/// Number of entries in a zip archive; errors double as the integrity check.
async fn archive_entries(path: &Path) -> OrchestratorResult<usize> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> OrchestratorResult<usize> {
        let file = File::open(&path).map_err(|e| {
            OrchestratorError::BackupIntegrity(format!("{}: {e}", path.display()))
        })?;
        let archive = zip::ZipArchive::new(file)?;
        Ok(archive.len())
    })
    .await
    .map_err(join_error)?
}

async fn extract_archive(src: &Path, dest: &Path) -> OrchestratorResult<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> OrchestratorResult<()> {
        let file = File::open(&src)?;
        let mut archive = zip::ZipArchive::new(file)?;
        std::fs::create_dir_all(&dest)?;
        archive.extract(&dest)?;
        Ok(())
    })
    .await
    .map_err(join_error)?
}

/// Zip a directory tree rooted at `src`, excluding any component whose name
/// appears in `excludes` and anything under `skip_prefix` (the backup root,
/// when it lives inside the project tree).
fn zip_tree(
    src: &Path,
    dest: &Path,
    excludes: &[&str],
    skip_prefix: Option<&Path>,
) -> OrchestratorResult<u64> {
    let file = File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut stack = vec![src.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();

            if excludes.iter().any(|e| name == std::ffi::OsStr::new(e)) {
                continue;
            }
            if skip_prefix.is_some_and(|prefix| path.starts_with(prefix)) {
                continue;
            }

            let rel = path
                .strip_prefix(src)
                .map_err(|e| OrchestratorError::Io(std::io::Error::other(e)))?
                .to_string_lossy()
                .into_owned();

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                writer.add_directory(rel, options)?;
                stack.push(path);
            } else if file_type.is_file() {
                writer.start_file(rel, options)?;
                let mut source = File::open(&path)?;
                std::io::copy(&mut source, &mut writer)?;
            }
            // Symlinks are not archived.
        }
    }

    writer.finish()?;
    Ok(std::fs::metadata(dest)?.len())
}

/// Zip an explicit list of paths (files or directories), relative to `base`.
fn zip_paths(base: &Path, paths: &[PathBuf], dest: &Path) -> OrchestratorResult<u64> {
    let file = File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut stack: Vec<PathBuf> = paths.iter().map(|p| base.join(p)).collect();
    while let Some(path) = stack.pop() {
        if !path.exists() {
            warn!("config path {} missing, skipping", path.display());
            continue;
        }

        let rel = path
            .strip_prefix(base)
            .map_err(|e| OrchestratorError::Io(std::io::Error::other(e)))?
            .to_string_lossy()
            .into_owned();

        if path.is_dir() {
            writer.add_directory(rel, options)?;
            for entry in std::fs::read_dir(&path)? {
                stack.push(entry?.path());
            }
        } else {
            writer.start_file(rel, options)?;
            let mut source = File::open(&path)?;
            std::io::copy(&mut source, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(std::fs::metadata(dest)?.len())
}
