//! Webhook dispatch engine for Tasklane domain events.
//!
//! Turns internal domain events (task, project, comment and member lifecycle
//! changes) into signed HTTP callbacks delivered to third-party endpoints
//! with bounded retries and exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐  dispatch()  ┌────────────┐  per event   ┌────────────────┐
//! │ Producers │─────────────▶│ EventQueue │─────────────▶│ DispatchLoop   │
//! └───────────┘  (O(1) send) └────────────┘  FIFO drain  └────────────────┘
//!                                                          │ resolve + shape
//!                                              fan-out     ▼
//!                                          ┌────────────────────────────┐
//!                                          │ DeliveryWorker per         │
//!                                          │ (event, subscription):     │
//!                                          │ sign → POST → retry/backoff│
//!                                          └────────────────────────────┘
//! ```
//!
//! One event's deliveries all reach a terminal state before the next event
//! is dequeued; deliveries within one event run concurrently and fail
//! independently. Producers never observe delivery outcomes synchronously —
//! results flow through `tracing`, [`DispatcherStats`] and the
//! [`tasklane_core::EventHandler`] side channel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tasklane_core::RealClock;
//! use tasklane_webhooks::{
//!     DispatcherConfig, InMemorySubscriptionResolver, WebhookDispatcher,
//! };
//!
//! # fn example() -> Result<(), tasklane_webhooks::DeliveryError> {
//! let resolver = Arc::new(InMemorySubscriptionResolver::new());
//! let dispatcher = WebhookDispatcher::new(
//!     resolver,
//!     DispatcherConfig::default(),
//!     Arc::new(RealClock::new()),
//! )?;
//!
//! dispatcher.dispatch("task.created", serde_json::json!({"project_id": "..."}));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod resolver;
pub mod retry;
pub mod signer;

pub use client::{ClientConfig, DeliveryClient};
pub use delivery::{DeliveryOutcome, DeliveryReport, DeliveryState};
pub use dispatcher::{DispatcherConfig, DispatcherState, DispatcherStats, WebhookDispatcher};
pub use error::{DeliveryError, Result};
pub use payload::{PayloadBuilder, PayloadEnvelope};
pub use resolver::{
    extract_project_id, InMemorySubscriptionResolver, ResolveError, SubscriptionResolver,
};
pub use retry::{RetryDecision, RetryPolicy};

/// Total delivery attempts per (event, subscription) pair, initial included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Per-attempt HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 15;

/// User agent sent with every delivery.
pub const USER_AGENT: &str = concat!("Tasklane-Webhooks/", env!("CARGO_PKG_VERSION"));

/// Header carrying the event type name.
pub const EVENT_TYPE_HEADER: &str = "X-Tasklane-Event";

/// Header carrying the delivery ID.
pub const DELIVERY_ID_HEADER: &str = "X-Tasklane-Delivery";

/// Header carrying the HMAC payload signature.
pub const SIGNATURE_HEADER: &str = "X-Tasklane-Signature";
