//! End-to-end delivery outcome tests.
//!
//! Drives the full dispatcher against mock receivers, verifying attempt
//! counts, terminal outcomes, and backoff timing on the test clock.

use std::time::Duration;

use anyhow::Result;
use http::StatusCode;
use serde_json::json;
use tasklane_core::{DispatchEvent, ProjectId};
use tasklane_testing::TestEnv;
use tasklane_webhooks::{ClientConfig, DispatcherConfig};

fn task_payload(project_id: ProjectId) -> serde_json::Value {
    json!({
        "task": {"id": 41, "title": "write the changelog"},
        "user": {"id": 7},
        "project": {"id": project_id.to_string(), "name": "launch"},
    })
}

#[tokio::test]
async fn endpoint_accepting_first_attempt_succeeds() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_ok("/hooks").await;

    env.dispatcher.dispatch("task.created", task_payload(project));
    env.settle().await;

    env.receiver.assert_request_count(1).await;
    assert_eq!(env.clock.elapsed(), Duration::ZERO, "no backoff on a clean success");

    let succeeded = env.events.succeeded();
    assert_eq!(succeeded.len(), 1);
    assert!(matches!(
        succeeded[0],
        DispatchEvent::Succeeded { status: 200, attempt_number: 1, .. }
    ));

    let stats = env.dispatcher.stats().await;
    assert_eq!(stats.deliveries_succeeded, 1);
    assert_eq!(stats.deliveries_failed, 0);
    Ok(())
}

#[tokio::test]
async fn rejecting_endpoint_gets_exactly_one_attempt() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_status("/hooks", StatusCode::NOT_FOUND).await;

    env.dispatcher.dispatch("task.created", task_payload(project));
    env.settle().await;

    env.receiver.assert_request_count(1).await;
    assert_eq!(env.clock.elapsed(), Duration::ZERO, "4xx must not back off");

    let failed = env.events.failed();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0],
        DispatchEvent::Failed { status: Some(404), attempts: 1, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn failing_endpoint_exhausts_three_attempts_with_backoff() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_status("/hooks", StatusCode::INTERNAL_SERVER_ERROR).await;

    env.dispatcher.dispatch("task.created", task_payload(project));
    env.settle().await;

    env.receiver.assert_request_count(3).await;
    // 2s after the first failure plus 4s after the second
    assert_eq!(env.clock.elapsed(), Duration::from_secs(6));

    let failed = env.events.failed();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0],
        DispatchEvent::Failed { status: Some(500), attempts: 3, .. }
    ));

    let stats = env.dispatcher.stats().await;
    assert_eq!(stats.deliveries_failed, 1);
    assert_eq!(stats.in_flight_deliveries, 0);
    Ok(())
}

#[tokio::test]
async fn endpoint_recovering_on_final_attempt_succeeds() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver
        .respond_ok_after_failures("/hooks", 2, StatusCode::SERVICE_UNAVAILABLE)
        .await;

    env.dispatcher.dispatch("task.created", task_payload(project));
    env.settle().await;

    env.receiver.assert_request_count(3).await;
    assert_eq!(env.clock.elapsed(), Duration::from_secs(6));

    let succeeded = env.events.succeeded();
    assert_eq!(succeeded.len(), 1);
    assert!(matches!(
        succeeded[0],
        DispatchEvent::Succeeded { status: 200, attempt_number: 3, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn timed_out_attempts_retry_like_server_errors() -> Result<()> {
    let config = DispatcherConfig {
        client: ClientConfig { timeout: Duration::from_millis(100), ..Default::default() },
        ..Default::default()
    };
    let env = TestEnv::start_with(config).await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_ok_after_delay("/hooks", Duration::from_secs(1)).await;

    env.dispatcher.dispatch("task.created", task_payload(project));
    env.settle().await;

    env.receiver.assert_request_count(3).await;

    let failed = env.events.failed();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed[0], DispatchEvent::Failed { status: None, attempts: 3, .. }));
    Ok(())
}

#[tokio::test]
async fn attempt_started_events_track_every_attempt() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_status("/hooks", StatusCode::BAD_GATEWAY).await;

    env.dispatcher.dispatch("task.created", task_payload(project));
    env.settle().await;

    let attempt_numbers: Vec<u32> = env
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DispatchEvent::AttemptStarted { attempt_number, .. } => Some(attempt_number),
            _ => None,
        })
        .collect();
    assert_eq!(attempt_numbers, vec![1, 2, 3]);
    Ok(())
}
