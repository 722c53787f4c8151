//! Backup-backed remediation paths
//!
//! The config and full-system levels only work when a verified
//! last-known-good backup exists; these tests wire the orchestrator and the
//! backup manager against a real (temp) filesystem.

use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use vigil::errors::OrchestratorError;
use vigil::{BackupKind, Outcome, Overall, RequestedLevel, RollbackLevel, RollbackTrigger};

use crate::helpers::*;

/// Take a healthy pre-deployment backup so `last-known-good` points at the
/// pristine project tree set up by `stack()`.
async fn seed_known_good(stack: &TestStack) -> String {
    let health = SequenceHealth::always(Overall::Healthy);
    let manifest = stack
        .backups
        .create(BackupKind::PreDeployment, Some(&health))
        .await
        .unwrap();
    assert!(manifest.verified);

    let pointer = stack.backups.latest_known_good().unwrap().unwrap();
    assert_eq!(pointer.id, manifest.id);
    manifest.id
}

#[tokio::test]
async fn full_system_level_restores_the_last_known_good_tree() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    seed_known_good(&stack).await;

    // A bad deployment lands.
    std::fs::write(stack.project_root().join("app.py"), "broken\n").unwrap();

    let attempt = stack
        .orchestrator
        .execute(
            RollbackTrigger::Manual,
            RequestedLevel::At(RollbackLevel::FullSystem),
            None,
        )
        .await
        .unwrap();

    assert_eq!(attempt.outcome, Some(Outcome::Succeeded));

    let restored = std::fs::read_to_string(stack.project_root().join("app.py")).unwrap();
    assert_eq!(restored, "print('v1')\n");

    // Teardown happened before the restore, rebuild after it.
    let calls = stack.controller.calls();
    let down = calls.iter().position(|c| c == "down").unwrap();
    let rebuild = calls
        .iter()
        .position(|c| c == "rebuild(no_cache=true)")
        .unwrap();
    let up = calls.iter().position(|c| c == "up").unwrap();
    assert!(down < rebuild && rebuild < up);

    // The database dump taken at backup time was replayed.
    assert!(calls.contains(&"restore_database(database.sql)".to_string()));
}

#[tokio::test]
async fn config_level_touches_only_the_configuration() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    seed_known_good(&stack).await;

    std::fs::write(
        stack.project_root().join("config").join("settings.json"),
        "garbage",
    )
    .unwrap();
    std::fs::write(stack.project_root().join("app.py"), "broken\n").unwrap();

    let attempt = stack
        .orchestrator
        .execute(
            RollbackTrigger::Auto,
            RequestedLevel::At(RollbackLevel::Config),
            None,
        )
        .await
        .unwrap();

    assert_eq!(attempt.outcome, Some(Outcome::Succeeded));
    assert_eq!(attempt.executed_levels, vec![RollbackLevel::Config]);

    // Config came back, the code change was left alone.
    let settings =
        std::fs::read_to_string(stack.project_root().join("config").join("settings.json"))
            .unwrap();
    assert_eq!(settings, "{\"v\":1}\n");
    let code = std::fs::read_to_string(stack.project_root().join("app.py")).unwrap();
    assert_eq!(code, "broken\n");

    assert!(stack.controller.calls().contains(&"restart".to_string()));
}

#[tokio::test]
async fn full_system_without_a_known_good_backup_cannot_succeed() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Unhealthy)));

    let err = stack
        .orchestrator
        .execute(
            RollbackTrigger::Manual,
            RequestedLevel::At(RollbackLevel::FullSystem),
            None,
        )
        .await
        .unwrap_err();

    assert_matches!(err, OrchestratorError::ExhaustedEscalation);

    // Nothing was torn down on the failed attempt.
    assert!(!stack.controller.calls().contains(&"down".to_string()));
}

#[tokio::test]
async fn restore_rejects_an_unknown_id_before_stopping_anything() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));

    let err = stack.backups.restore("20190101-000000000-manual").await.unwrap_err();
    assert_matches!(err, OrchestratorError::BackupIntegrity(_));
    assert!(stack.controller.calls().is_empty());
}

#[tokio::test]
async fn restoring_the_same_backup_twice_converges_to_the_same_tree() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let id = seed_known_good(&stack).await;

    std::fs::write(stack.project_root().join("app.py"), "broken\n").unwrap();
    stack.backups.restore(&id).await.unwrap();
    let first = std::fs::read_to_string(stack.project_root().join("app.py")).unwrap();

    stack.backups.restore(&id).await.unwrap();
    let second = std::fs::read_to_string(stack.project_root().join("app.py")).unwrap();

    assert_eq!(first, "print('v1')\n");
    assert_eq!(first, second);
}
