//! Test environment for webhook dispatch tests.
//!
//! Wires a dispatcher to an in-memory subscription resolver, a mock HTTP
//! receiver, a collecting event handler, and a controllable clock, so
//! integration tests read as scenarios instead of plumbing.

pub mod http;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use anyhow::Result;

use tasklane_core::{
    DispatchEvent, EventHandler, EventType, ProjectId, SubscriptionId, TestClock,
    WebhookSubscription,
};
use tasklane_webhooks::{
    DispatcherConfig, InMemorySubscriptionResolver, WebhookDispatcher,
};

pub use http::ReceiverMock;

/// Event handler that records every dispatch event it sees.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    events: Mutex<Vec<DispatchEvent>>,
}

impl CollectingHandler {
    /// Creates an empty collecting handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in arrival order.
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().expect("handler lock poisoned").clone()
    }

    /// Recorded terminal successes.
    pub fn succeeded(&self) -> Vec<DispatchEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, DispatchEvent::Succeeded { .. }))
            .collect()
    }

    /// Recorded terminal failures.
    pub fn failed(&self) -> Vec<DispatchEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, DispatchEvent::Failed { .. }))
            .collect()
    }

    /// Recorded drops.
    pub fn dropped(&self) -> Vec<DispatchEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, DispatchEvent::Dropped { .. }))
            .collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for CollectingHandler {
    async fn handle_event(&self, event: DispatchEvent) {
        self.events.lock().expect("handler lock poisoned").push(event);
    }
}

/// Fully wired dispatch environment for integration tests.
pub struct TestEnv {
    /// Controllable clock injected into the dispatcher; backoff sleeps
    /// advance it instead of waiting.
    pub clock: Arc<TestClock>,
    /// Resolver the dispatcher routes through.
    pub resolver: Arc<InMemorySubscriptionResolver>,
    /// Observer capturing every dispatch event.
    pub events: Arc<CollectingHandler>,
    /// Mock receiver endpoints deliveries land on.
    pub receiver: ReceiverMock,
    /// The dispatcher under test.
    pub dispatcher: WebhookDispatcher,
}

impl TestEnv {
    /// Starts an environment with default dispatcher configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot be constructed.
    pub async fn start() -> Result<Self> {
        Self::start_with(DispatcherConfig::default()).await
    }

    /// Starts an environment with custom dispatcher configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot be constructed.
    pub async fn start_with(config: DispatcherConfig) -> Result<Self> {
        init_test_tracing();

        let clock = Arc::new(TestClock::new());
        let resolver = Arc::new(InMemorySubscriptionResolver::new());
        let events = Arc::new(CollectingHandler::new());
        let receiver = ReceiverMock::start().await;

        let dispatcher = WebhookDispatcher::with_event_handler(
            resolver.clone(),
            config,
            clock.clone(),
            events.clone(),
        )?;

        Ok(Self { clock, resolver, events, receiver, dispatcher })
    }

    /// Registers an active subscription pointing at a receiver path.
    pub async fn add_subscription(
        &self,
        project_id: ProjectId,
        endpoint_path: &str,
        event_names: &[&str],
        secret: Option<&str>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.resolver
            .add(WebhookSubscription {
                id,
                project_id,
                url: self.receiver.endpoint_url(endpoint_path),
                events: event_names.iter().map(|e| EventType::from(*e)).collect::<HashSet<_>>(),
                active: true,
                secret: secret.map(str::to_string),
            })
            .await;
        id
    }

    /// Waits until every dispatched event has settled.
    pub async fn settle(&self) {
        self.dispatcher.settled().await;
    }
}

/// Initializes tracing once per test binary, driven by `RUST_LOG`.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
