//! Subscription resolution and event routing.
//!
//! The subscription store lives outside the dispatch core; the core consumes
//! it through [`SubscriptionResolver`] and only decides *which project* an
//! event belongs to. Project-id extraction handles the heterogeneous payload
//! shapes the domain layer produces.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use tasklane_core::{EventType, ProjectId, WebhookSubscription};

/// Failure reported by the subscription store.
#[derive(Debug, Clone, Error)]
#[error("subscription lookup failed: {message}")]
pub struct ResolveError {
    /// Description of the lookup failure.
    pub message: String,
}

impl ResolveError {
    /// Creates a resolve error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Source of active webhook subscriptions.
///
/// Implementations return only subscriptions that are active and subscribed
/// to the given event type; the dispatch loop re-checks both anyway before
/// targeting one. A returned error drops the event being routed, it never
/// stalls the loop.
#[async_trait::async_trait]
pub trait SubscriptionResolver: Send + Sync + std::fmt::Debug {
    /// Returns matching subscriptions for a project and event type.
    async fn resolve(
        &self,
        project_id: ProjectId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookSubscription>, ResolveError>;
}

/// Extracts the owning project from a heterogeneous event payload.
///
/// Precedence: `data.project.id`, then `data.task.project_id`, then
/// `data.project_id`; first parseable match wins. `None` means the event
/// cannot be routed and must be dropped.
pub fn extract_project_id(data: &Value) -> Option<ProjectId> {
    let candidates = [
        data.get("project").and_then(|p| p.get("id")),
        data.get("task").and_then(|t| t.get("project_id")),
        data.get("project_id"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
        .map(ProjectId::from)
}

/// Subscription resolver backed by an in-memory list.
///
/// Used by tests and by embeddings that keep subscriptions in process
/// memory. Registration is append-only here; real deployments implement
/// [`SubscriptionResolver`] over their subscription store instead.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionResolver {
    subscriptions: Arc<RwLock<Vec<WebhookSubscription>>>,
}

impl InMemorySubscriptionResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription.
    pub async fn add(&self, subscription: WebhookSubscription) {
        self.subscriptions.write().await.push(subscription);
    }
}

#[async_trait::async_trait]
impl SubscriptionResolver for InMemorySubscriptionResolver {
    async fn resolve(
        &self,
        project_id: ProjectId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookSubscription>, ResolveError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .iter()
            .filter(|s| s.project_id == project_id && s.wants(event_type))
            .cloned()
            .collect())
    }
}
