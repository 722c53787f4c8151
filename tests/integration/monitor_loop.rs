//! Threshold discipline of the continuous monitor
//!
//! Driven via `tick_now` so no test waits on the wall-clock interval. The
//! interval timer also fires once immediately on spawn, so assertions are
//! written against "at least N ticks" rather than exact tick counts.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vigil::config::{MonitorConfig, ServiceConfig, Thresholds};
use vigil::health::Aggregator;
use vigil::monitor::MonitorHandle;
use vigil::Overall;

use crate::helpers::*;

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        // Long enough that only the immediate first tick fires on its own.
        check_interval: 3600,
        failure_threshold: 3,
        ..MonitorConfig::default()
    }
}

#[tokio::test]
async fn consecutive_unhealthy_checks_trigger_a_rollback() {
    // The system under watch never recovers; the rollback itself verifies
    // healthy so the triggered attempt succeeds at its first level.
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let watch = Arc::new(SequenceHealth::always(Overall::Unhealthy));

    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        watch,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        monitor_config(),
        cancel.clone(),
    );

    for _ in 0..3 {
        assert_eq!(handle.tick_now().await, Some(Overall::Unhealthy));
    }

    // Threshold reached: the orchestrator ran and remediated something.
    assert!(stack.controller.calls().contains(&"restart".to_string()));
    assert_eq!(stack.incident_count(), 1);

    // The counter was consumed by the trigger, not left at the threshold.
    let state = handle.state().await.unwrap();
    assert!(state.health_failures < 3);
    assert!(!state.auto_rollback_disabled);

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn a_healthy_check_resets_the_counters() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let watch = Arc::new(SequenceHealth::new(vec![
        Overall::Unhealthy,
        Overall::Unhealthy,
        Overall::Healthy,
    ]));

    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        watch,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        monitor_config(),
        cancel.clone(),
    );

    for _ in 0..3 {
        handle.tick_now().await.unwrap();
    }

    let state = handle.state().await.unwrap();
    assert_eq!(state.health_failures, 0);
    assert_eq!(state.perf_failures, 0);

    // No rollback ran.
    assert_eq!(stack.incident_count(), 0);
    assert!(stack.alert_log().contains("recovered"));

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn recovery_alert_fires_after_a_successful_rollback() {
    // Three unhealthy checks trigger a rollback that succeeds; the next
    // healthy tick must still announce the recovery even though the
    // threshold counter was consumed by the trigger.
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let watch = Arc::new(SequenceHealth::new(vec![
        Overall::Unhealthy,
        Overall::Unhealthy,
        Overall::Unhealthy,
        Overall::Healthy,
    ]));

    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        watch,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        monitor_config(),
        cancel.clone(),
    );

    for _ in 0..4 {
        handle.tick_now().await.unwrap();
    }

    assert_eq!(stack.incident_count(), 1);
    assert!(stack.alert_log().contains("rollback"));
    assert!(stack.alert_log().contains("recovered"));

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn disabled_rollback_still_counts_and_alerts_but_never_invokes() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let watch = Arc::new(SequenceHealth::always(Overall::Unhealthy));

    let config = MonitorConfig {
        rollback_enabled: false,
        ..monitor_config()
    };

    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        watch,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        config,
        cancel.clone(),
    );

    for _ in 0..6 {
        handle.tick_now().await.unwrap();
    }

    // Alerts kept flowing, but the orchestrator was never touched.
    assert!(stack.alert_log().contains("consecutive failures"));
    assert_eq!(stack.incident_count(), 0);
    assert!(stack.controller.calls().is_empty());

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn degraded_states_are_ignored_when_performance_checks_are_off() {
    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let watch = Arc::new(SequenceHealth::always(Overall::Degraded));

    let config = MonitorConfig {
        performance_check_enabled: false,
        ..monitor_config()
    };

    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        watch,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        config,
        cancel.clone(),
    );

    for _ in 0..5 {
        assert_eq!(handle.tick_now().await, Some(Overall::Degraded));
    }

    let state = handle.state().await.unwrap();
    assert_eq!(state.perf_failures, 0);
    assert_eq!(stack.incident_count(), 0);

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn exhausted_escalation_disables_auto_rollback_for_good() {
    // Verification never passes, so the triggered rollback runs out of
    // levels and the monitor must stop triggering new attempts.
    let watch = Arc::new(SequenceHealth::always(Overall::Unhealthy));
    let stack = stack(watch.clone());

    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        watch,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        monitor_config(),
        cancel.clone(),
    );

    for _ in 0..3 {
        handle.tick_now().await.unwrap();
    }

    let state = handle.state().await.unwrap();
    assert!(state.auto_rollback_disabled);
    assert_eq!(stack.incident_count(), 1);

    // Reaching the threshold again does not start another attempt.
    for _ in 0..4 {
        handle.tick_now().await.unwrap();
    }
    assert_eq!(stack.incident_count(), 1);

    cancel.cancel();
    join.await.unwrap();
}

#[tokio::test]
async fn unreachable_service_is_detected_end_to_end() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let aggregator = Arc::new(Aggregator::new(
        vec![ServiceConfig {
            name: "web".to_string(),
            url: format!("{}/health", mock_server.uri()),
            timeout: 2,
            retries: 0,
            retry_delay: 0,
            required: true,
            expected_status: None,
            body_pattern: None,
        }],
        Thresholds::default(),
    ));

    let stack = stack(Arc::new(SequenceHealth::always(Overall::Healthy)));
    let cancel = CancellationToken::new();
    let (handle, join) = MonitorHandle::spawn(
        aggregator,
        stack.orchestrator.clone(),
        stack.alerts.clone(),
        monitor_config(),
        cancel.clone(),
    );

    for _ in 0..3 {
        assert_eq!(handle.tick_now().await, Some(Overall::Unhealthy));
    }

    // Three real failed probes drove a real rollback.
    assert_eq!(stack.incident_count(), 1);
    assert!(stack.controller.calls().contains(&"restart".to_string()));

    cancel.cancel();
    join.await.unwrap();
}
