//! Core domain types for the Tasklane webhook pipeline.
//!
//! Provides strongly-typed identifiers, the domain event and subscription
//! models consumed by the dispatch engine, the observer-side event types, and
//! the clock abstraction used to make timing-dependent code testable. All
//! other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod models;
pub mod time;

pub use events::{
    DispatchEvent, DropReason, EventHandler, MulticastEventHandler, NoOpEventHandler,
};
pub use models::{
    event_types, AttemptOutcome, DeliveryAttempt, DeliveryId, DomainEvent, EventId, EventType,
    ProjectId, SubscriptionId, WebhookSubscription,
};
pub use time::{Clock, RealClock, TestClock};
