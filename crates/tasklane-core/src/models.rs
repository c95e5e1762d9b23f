//! Domain models and strongly-typed identifiers.
//!
//! Defines the domain event submitted for dispatch, the externally-owned
//! webhook subscription, the ephemeral delivery attempt record, and newtype
//! ID wrappers for compile-time type safety.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Strongly-typed domain event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// once enqueued, and this ID follows them through the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed project identifier.
///
/// Every webhook subscription is scoped to a project; an event can only be
/// routed once its owning project is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    /// Creates a new random project ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProjectId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed webhook subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed delivery identifier.
///
/// One delivery is the full attempt series for an (event, subscription) pair.
/// All retries of the same delivery share this ID, so receivers can
/// deduplicate redelivered payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Name of a domain event, e.g. `task.created`.
///
/// The set is open: producers may dispatch event types the payload builder
/// has no template for, in which case the generic envelope is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    /// Creates an event type from its wire name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the wire name of this event type.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Well-known event type names emitted by the collaboration domain.
pub mod event_types {
    /// A task was created.
    pub const TASK_CREATED: &str = "task.created";
    /// A task's fields were updated.
    pub const TASK_UPDATED: &str = "task.updated";
    /// A task moved between workflow statuses.
    pub const TASK_STATUS_CHANGED: &str = "task.status_changed";
    /// A task was deleted.
    pub const TASK_DELETED: &str = "task.deleted";
    /// A comment was posted on a task.
    pub const COMMENT_CREATED: &str = "comment.created";
    /// A project's settings were updated.
    pub const PROJECT_UPDATED: &str = "project.updated";
    /// A member joined a project.
    pub const MEMBER_ADDED: &str = "project.member_added";
    /// A member left or was removed from a project.
    pub const MEMBER_REMOVED: &str = "project.member_removed";
    /// A project member's role changed.
    pub const MEMBER_ROLE_CHANGED: &str = "project.member_role_changed";
}

/// An internal fact submitted for webhook dispatch.
///
/// Created by producers calling `dispatch`, immutable once enqueued, and
/// discarded after the dispatch loop has fanned it out. There is no
/// persistence: a process restart loses queued events by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Globally unique event identifier.
    pub id: EventId,

    /// Wire name of the event, e.g. `task.created`.
    pub event_type: EventType,

    /// Event payload as produced by the domain layer.
    pub data: Value,

    /// When the event was accepted into the queue.
    pub enqueued_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Creates a new domain event with a fresh ID.
    pub fn new(event_type: EventType, data: Value, enqueued_at: DateTime<Utc>) -> Self {
        Self { id: EventId::new(), event_type, data, enqueued_at }
    }
}

/// A registered external endpoint plus the event types it wants.
///
/// Owned by the subscription store outside the dispatch core; the core reads
/// these and never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Project this subscription is scoped to.
    pub project_id: ProjectId,

    /// Destination URL for webhook POSTs.
    pub url: String,

    /// Event types this subscription wants to receive.
    pub events: HashSet<EventType>,

    /// Whether the subscription is currently enabled.
    pub active: bool,

    /// Optional signing secret. When present, every delivery carries an
    /// HMAC-SHA256 signature header computed over the exact body bytes.
    pub secret: Option<String>,
}

impl WebhookSubscription {
    /// Returns true if this subscription should receive the given event type.
    pub fn wants(&self, event_type: &EventType) -> bool {
        self.active && self.events.contains(event_type)
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Attempt not yet made.
    Pending,
    /// Endpoint acknowledged with 2xx.
    Success,
    /// Transient failure, another attempt is scheduled.
    RetryScheduled,
    /// Terminal failure, no further attempts.
    Failed,
}

/// Ephemeral record of one delivery attempt.
///
/// Kept in memory for the duration of a delivery and surfaced through the
/// delivery report; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Delivery this attempt belongs to.
    pub delivery_id: DeliveryId,

    /// Subscription being delivered to.
    pub subscription_id: SubscriptionId,

    /// 1-based attempt number.
    pub attempt_number: u32,

    /// What happened on this attempt.
    pub outcome: AttemptOutcome,

    /// HTTP status code, when the endpoint responded.
    pub http_status: Option<u16>,

    /// Error description for failed or retried attempts.
    pub error: Option<String>,
}
