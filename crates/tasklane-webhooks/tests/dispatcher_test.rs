//! Dispatch loop ordering, isolation, and routing tests.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use http::StatusCode;
use proptest::prelude::*;
use serde_json::json;
use tasklane_core::{DispatchEvent, DropReason, EventType, ProjectId, TestClock};
use tasklane_testing::TestEnv;
use tasklane_webhooks::{
    DispatcherConfig, InMemorySubscriptionResolver, ResolveError, SubscriptionResolver,
    WebhookDispatcher,
};

/// Resolver that records the order it is queried in.
#[derive(Debug, Default)]
struct RecordingResolver {
    seen: Mutex<Vec<String>>,
}

impl RecordingResolver {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("resolver lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl SubscriptionResolver for RecordingResolver {
    async fn resolve(
        &self,
        _project_id: ProjectId,
        event_type: &EventType,
    ) -> std::result::Result<Vec<tasklane_core::WebhookSubscription>, ResolveError> {
        self.seen.lock().expect("resolver lock poisoned").push(event_type.to_string());
        Ok(Vec::new())
    }
}

/// Resolver that fails its first lookup, then delegates.
#[derive(Debug)]
struct FailOnceResolver {
    inner: Arc<InMemorySubscriptionResolver>,
    failed: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl SubscriptionResolver for FailOnceResolver {
    async fn resolve(
        &self,
        project_id: ProjectId,
        event_type: &EventType,
    ) -> std::result::Result<Vec<tasklane_core::WebhookSubscription>, ResolveError> {
        if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(ResolveError::new("subscription store unavailable"));
        }
        self.inner.resolve(project_id, event_type).await
    }
}

fn routed(project: ProjectId) -> serde_json::Value {
    json!({"project_id": project.to_string()})
}

#[tokio::test]
async fn resolver_is_queried_in_dispatch_order() -> Result<()> {
    let resolver = Arc::new(RecordingResolver::default());
    let dispatcher = WebhookDispatcher::new(
        resolver.clone(),
        DispatcherConfig::default(),
        Arc::new(TestClock::new()),
    )?;

    let project = ProjectId::new();
    let expected: Vec<String> = (0..25).map(|i| format!("audit.step_{i}")).collect();
    for event_type in &expected {
        dispatcher.dispatch(event_type.as_str(), routed(project));
    }
    dispatcher.settled().await;

    assert_eq!(resolver.seen(), expected);
    dispatcher.shutdown().await;
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// FIFO holds for arbitrary event type sequences, including dispatches
    /// that arrive while the loop is already draining.
    #[test]
    fn fifo_order_holds_for_arbitrary_sequences(
        names in prop::collection::vec("[a-z]{2,8}\\.[a-z]{2,8}", 1..40)
    ) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime builds");
        runtime.block_on(async {
            let resolver = Arc::new(RecordingResolver::default());
            let dispatcher = WebhookDispatcher::new(
                resolver.clone(),
                DispatcherConfig::default(),
                Arc::new(TestClock::new()),
            )
            .expect("dispatcher builds");

            let project = ProjectId::new();
            for name in &names {
                dispatcher.dispatch(name.as_str(), routed(project));
            }
            dispatcher.settled().await;

            prop_assert_eq!(resolver.seen(), names);
            dispatcher.shutdown().await;
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn sibling_failure_does_not_suppress_sibling_success() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();

    env.add_subscription(project, "/steady", &["task.created", "task.deleted"], None).await;
    env.add_subscription(project, "/flaky", &["task.created"], None).await;
    env.receiver.respond_ok("/steady").await;
    env.receiver.respond_status("/flaky", StatusCode::INTERNAL_SERVER_ERROR).await;

    env.dispatcher.dispatch("task.created", routed(project));
    env.dispatcher.dispatch("task.deleted", routed(project));
    env.settle().await;

    // Event 1: one success on /steady, three exhausted attempts on /flaky.
    // Event 2: one success on /steady, dispatched only after event 1 settled.
    assert_eq!(env.receiver.received_on("/steady").await.len(), 2);
    assert_eq!(env.receiver.received_on("/flaky").await.len(), 3);

    let all = env.receiver.received().await;
    assert_eq!(all.len(), 5);
    let last = &all[all.len() - 1];
    assert_eq!(last.url.path(), "/steady", "event 2 must be delivered last");
    let body: serde_json::Value = serde_json::from_slice(&last.body)?;
    assert_eq!(body["event"], "task.deleted");

    let stats = env.dispatcher.stats().await;
    assert_eq!(stats.deliveries_succeeded, 2);
    assert_eq!(stats.deliveries_failed, 1);
    assert_eq!(stats.events_processed, 2);
    Ok(())
}

#[tokio::test]
async fn resolver_failure_drops_event_and_loop_continues() -> Result<()> {
    let inner = Arc::new(InMemorySubscriptionResolver::new());
    let resolver = Arc::new(FailOnceResolver {
        inner: inner.clone(),
        failed: std::sync::atomic::AtomicBool::new(false),
    });

    let env_like_clock = Arc::new(TestClock::new());
    let events = Arc::new(tasklane_testing::CollectingHandler::new());
    let dispatcher = WebhookDispatcher::with_event_handler(
        resolver,
        DispatcherConfig::default(),
        env_like_clock,
        events.clone(),
    )?;

    let receiver = tasklane_testing::ReceiverMock::start().await;
    receiver.respond_ok("/hooks").await;
    let project = ProjectId::new();
    inner
        .add(tasklane_core::WebhookSubscription {
            id: tasklane_core::SubscriptionId::new(),
            project_id: project,
            url: receiver.endpoint_url("/hooks"),
            events: [EventType::from("task.created")].into_iter().collect(),
            active: true,
            secret: None,
        })
        .await;

    dispatcher.dispatch("task.created", routed(project));
    dispatcher.dispatch("task.created", routed(project));
    dispatcher.settled().await;

    // First event dropped on the resolver error, second delivered normally.
    receiver.assert_request_count(1).await;
    let dropped = events.dropped();
    assert_eq!(dropped.len(), 1);
    assert!(matches!(
        &dropped[0],
        DispatchEvent::Dropped { reason: DropReason::ResolverFailed(_), .. }
    ));

    let stats = dispatcher.stats().await;
    assert_eq!(stats.events_dropped, 1);
    assert_eq!(stats.events_processed, 1);
    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unroutable_event_is_dropped_with_reason() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_ok("/hooks").await;

    env.dispatcher.dispatch("task.created", json!({"user": {"id": 3}}));
    env.dispatcher.dispatch("task.created", routed(project));
    env.settle().await;

    env.receiver.assert_request_count(1).await;
    let dropped = env.events.dropped();
    assert_eq!(dropped.len(), 1);
    assert!(matches!(
        &dropped[0],
        DispatchEvent::Dropped { reason: DropReason::Unroutable, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn inactive_and_unsubscribed_endpoints_are_not_targeted() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();

    env.add_subscription(project, "/wanted", &["task.created"], None).await;
    env.add_subscription(project, "/other-type", &["task.deleted"], None).await;
    env.add_subscription(ProjectId::new(), "/other-project", &["task.created"], None).await;
    let inactive = tasklane_core::WebhookSubscription {
        id: tasklane_core::SubscriptionId::new(),
        project_id: project,
        url: env.receiver.endpoint_url("/inactive"),
        events: [EventType::from("task.created")].into_iter().collect(),
        active: false,
        secret: None,
    };
    env.resolver.add(inactive).await;

    env.receiver.respond_ok("/wanted").await;
    env.receiver.respond_ok("/other-type").await;
    env.receiver.respond_ok("/other-project").await;
    env.receiver.respond_ok("/inactive").await;

    env.dispatcher.dispatch("task.created", routed(project));
    env.settle().await;

    env.receiver.assert_request_count(1).await;
    assert_eq!(env.receiver.received_on("/wanted").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_finishes_current_event_and_stops() -> Result<()> {
    let env = TestEnv::start().await?;
    let project = ProjectId::new();
    env.add_subscription(project, "/hooks", &["task.created"], None).await;
    env.receiver.respond_ok("/hooks").await;

    env.dispatcher.dispatch("task.created", routed(project));
    env.settle().await;
    env.receiver.assert_request_count(1).await;

    env.dispatcher.shutdown().await;
    Ok(())
}
