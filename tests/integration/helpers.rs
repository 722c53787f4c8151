//! Shared fakes for the integration suite

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vigil::alerts::Dispatcher;
use vigil::backup::BackupManager;
use vigil::config::{AlertConfig, BackupConfig, MonitorConfig};
use vigil::controller::{ServiceController, ServiceState};
use vigil::errors::{OrchestratorError, OrchestratorResult};
use vigil::git::GitRepo;
use vigil::health::HealthSource;
use vigil::incident::Reporter;
use vigil::rollback::Orchestrator;
use vigil::{HealthStatus, Overall};

/// Controller that records every call and answers from scripted state.
#[derive(Default)]
pub struct RecordingController {
    calls: Mutex<Vec<String>>,
    pub config_valid: AtomicBool,
    pub all_running: AtomicBool,
    pub fail_rebuild: AtomicBool,
}

impl RecordingController {
    pub fn healthy_system() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            config_valid: AtomicBool::new(true),
            all_running: AtomicBool::new(true),
            fail_rebuild: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl ServiceController for RecordingController {
    async fn up(&self, _services: &[String]) -> OrchestratorResult<()> {
        self.record("up");
        Ok(())
    }

    async fn stop(&self, _services: &[String]) -> OrchestratorResult<()> {
        self.record("stop");
        Ok(())
    }

    async fn restart(&self, _services: &[String]) -> OrchestratorResult<()> {
        self.record("restart");
        Ok(())
    }

    async fn rebuild(&self, _services: &[String], no_cache: bool) -> OrchestratorResult<()> {
        self.record(format!("rebuild(no_cache={no_cache})"));
        if self.fail_rebuild.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ControllerFailure(
                "rebuild failed".to_string(),
            ));
        }
        Ok(())
    }

    async fn down(&self, _volumes: bool) -> OrchestratorResult<()> {
        self.record("down");
        Ok(())
    }

    async fn service_states(&self) -> OrchestratorResult<BTreeMap<String, ServiceState>> {
        self.record("service_states");
        let state = if self.all_running.load(Ordering::SeqCst) {
            ServiceState::Running
        } else {
            ServiceState::Exited
        };
        Ok(BTreeMap::from([("web".to_string(), state)]))
    }

    async fn validate_config(&self) -> OrchestratorResult<bool> {
        self.record("validate_config");
        Ok(self.config_valid.load(Ordering::SeqCst))
    }

    async fn image_tag(&self, _service: &str) -> OrchestratorResult<Option<String>> {
        Ok(Some("sha256:test".to_string()))
    }

    async fn tag_image(&self, service: &str, tag: &str) -> OrchestratorResult<()> {
        self.record(format!("tag_image({service}, {tag})"));
        Ok(())
    }

    async fn restore_image(&self, service: &str, tag: &str) -> OrchestratorResult<bool> {
        self.record(format!("restore_image({service}, {tag})"));
        Ok(false)
    }

    async fn logs(&self, _service: &str, _tail: usize) -> OrchestratorResult<String> {
        Ok("log line\n".to_string())
    }

    async fn dump_database(&self, out: &Path) -> OrchestratorResult<()> {
        self.record("dump_database");
        std::fs::write(out, "-- pg_dump\n")?;
        Ok(())
    }

    async fn restore_database(&self, dump: &Path) -> OrchestratorResult<()> {
        self.record(format!(
            "restore_database({})",
            dump.file_name().unwrap_or_default().to_string_lossy()
        ));
        Ok(())
    }
}

/// Git fake recording branch/reset operations.
#[derive(Default)]
pub struct RecordingGit {
    calls: Mutex<Vec<String>>,
}

impl RecordingGit {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl GitRepo for RecordingGit {
    async fn current_commit(&self) -> OrchestratorResult<String> {
        Ok("deadbeef".to_string())
    }

    async fn current_branch(&self) -> OrchestratorResult<String> {
        Ok("main".to_string())
    }

    async fn create_branch(&self, name: &str) -> OrchestratorResult<()> {
        self.record(format!("create_branch({name})"));
        Ok(())
    }

    async fn tag(&self, name: &str) -> OrchestratorResult<()> {
        self.record(format!("tag({name})"));
        Ok(())
    }

    async fn stash(&self) -> OrchestratorResult<()> {
        self.record("stash");
        Ok(())
    }

    async fn hard_reset(&self, rev: &str) -> OrchestratorResult<()> {
        self.record(format!("hard_reset({rev})"));
        Ok(())
    }

    async fn latest_deploy_tag(&self) -> OrchestratorResult<Option<String>> {
        Ok(None)
    }

    async fn status_summary(&self) -> OrchestratorResult<String> {
        Ok("branch: main".to_string())
    }
}

/// Health source replaying a scripted sequence; the last entry repeats.
pub struct SequenceHealth {
    sequence: Mutex<Vec<Overall>>,
}

impl SequenceHealth {
    pub fn new(sequence: Vec<Overall>) -> Self {
        assert!(!sequence.is_empty(), "sequence must have at least one entry");
        Self {
            sequence: Mutex::new(sequence),
        }
    }

    pub fn always(overall: Overall) -> Self {
        Self::new(vec![overall])
    }
}

#[async_trait]
impl HealthSource for SequenceHealth {
    async fn current(&self) -> OrchestratorResult<HealthStatus> {
        let mut seq = self.sequence.lock().unwrap();
        let overall = if seq.len() > 1 { seq.remove(0) } else { seq[0] };
        Ok(HealthStatus {
            timestamp: chrono::Utc::now(),
            overall,
            services: BTreeMap::new(),
            consecutive_failures: 0,
        })
    }
}

/// Full component stack wired over the fakes, rooted in a tempdir.
pub struct TestStack {
    pub dir: TempDir,
    pub controller: Arc<RecordingController>,
    pub git: Arc<RecordingGit>,
    pub backups: Arc<BackupManager>,
    pub alerts: Arc<Dispatcher>,
    pub orchestrator: Arc<Orchestrator>,
}

impl TestStack {
    pub fn project_root(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    pub fn alert_log(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("alerts.log")).unwrap_or_default()
    }

    pub fn incident_count(&self) -> usize {
        match std::fs::read_dir(self.dir.path().join("incidents")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Wire a full stack where the orchestrator verifies against `verify_health`.
pub fn stack(verify_health: Arc<dyn HealthSource>) -> TestStack {
    stack_with_cancellation(verify_health, CancellationToken::new())
}

pub fn stack_with_cancellation(
    verify_health: Arc<dyn HealthSource>,
    cancel: CancellationToken,
) -> TestStack {
    let dir = tempfile::tempdir().unwrap();
    let project_root = dir.path().join("project");

    std::fs::create_dir_all(project_root.join("config")).unwrap();
    std::fs::write(project_root.join("app.py"), "print('v1')\n").unwrap();
    std::fs::write(project_root.join("config").join("settings.json"), "{\"v\":1}\n").unwrap();

    let controller = Arc::new(RecordingController::healthy_system());
    let git = Arc::new(RecordingGit::default());
    let services = vec!["web".to_string()];

    let backups = Arc::new(BackupManager::new(
        BackupConfig {
            root: dir.path().join("backups"),
            retention: 10,
            project_root: project_root.clone(),
            media_dir: None,
            config_paths: vec![PathBuf::from("config/settings.json")],
        },
        controller.clone() as Arc<dyn ServiceController>,
        git.clone() as Arc<dyn GitRepo>,
        services.clone(),
    ));
    let incidents = Arc::new(Reporter::new(
        dir.path().join("incidents"),
        controller.clone() as Arc<dyn ServiceController>,
        git.clone() as Arc<dyn GitRepo>,
        services.clone(),
    ));
    let alerts = Arc::new(Dispatcher::new(&AlertConfig {
        webhook: None,
        log_path: dir.path().join("alerts.log"),
    }));

    let monitor = MonitorConfig {
        startup_grace: 0,
        full_startup_grace: 0,
        ..MonitorConfig::default()
    };

    let orchestrator = Arc::new(
        Orchestrator::new(
            verify_health,
            controller.clone() as Arc<dyn ServiceController>,
            git.clone() as Arc<dyn GitRepo>,
            backups.clone(),
            incidents,
            alerts.clone(),
            services,
            &monitor,
        )
        .with_cancellation(cancel),
    );

    TestStack {
        dir,
        controller,
        git,
        backups,
        alerts,
        orchestrator,
    }
}
