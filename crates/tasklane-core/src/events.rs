//! Observer-side events for delivery outcomes.
//!
//! The dispatch engine never surfaces delivery results to the producer that
//! called `dispatch`; outcomes flow through this side channel instead.
//! Embedding code that needs delivery confirmation (metrics, activity feeds,
//! subscription health tracking) implements [`EventHandler`] and subscribes
//! via the multicast handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryId, EventId, EventType, SubscriptionId};

/// Why an event was dropped before any delivery was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// No project ID could be extracted from the event payload.
    Unroutable,
    /// The subscription resolver returned an error.
    ResolverFailed(String),
}

/// Events emitted by the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// A delivery attempt is about to be sent.
    AttemptStarted {
        /// Delivery this attempt belongs to.
        delivery_id: DeliveryId,
        /// Subscription being delivered to.
        subscription_id: SubscriptionId,
        /// Domain event being delivered.
        event_id: EventId,
        /// 1-based attempt number.
        attempt_number: u32,
        /// When the attempt started.
        started_at: DateTime<Utc>,
    },

    /// A delivery reached terminal success.
    Succeeded {
        /// Delivery that succeeded.
        delivery_id: DeliveryId,
        /// Subscription that acknowledged the payload.
        subscription_id: SubscriptionId,
        /// Domain event that was delivered.
        event_id: EventId,
        /// HTTP status returned by the endpoint.
        status: u16,
        /// Attempt on which the delivery succeeded.
        attempt_number: u32,
        /// When the successful response was received.
        delivered_at: DateTime<Utc>,
    },

    /// A delivery reached terminal failure.
    Failed {
        /// Delivery that failed.
        delivery_id: DeliveryId,
        /// Subscription that could not be delivered to.
        subscription_id: SubscriptionId,
        /// Domain event that failed to deliver.
        event_id: EventId,
        /// Last HTTP status, when the endpoint responded at all.
        status: Option<u16>,
        /// Total attempts made.
        attempts: u32,
        /// Description of the final error.
        error: String,
        /// When the delivery was abandoned.
        failed_at: DateTime<Utc>,
    },

    /// An event was dropped before fan-out.
    Dropped {
        /// Domain event that was dropped.
        event_id: EventId,
        /// Type of the dropped event.
        event_type: EventType,
        /// Why the event could not be routed.
        reason: DropReason,
    },
}

/// Trait for observing dispatch outcomes.
///
/// Handlers must not block delivery processing; failures inside a handler
/// should be logged by the handler itself, never propagated back into the
/// dispatch pipeline.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a dispatch event.
    async fn handle_event(&self, event: DispatchEvent);
}

/// No-op handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DispatchEvent) {}
}

/// Forwards events to any number of subscribers concurrently.
///
/// Lets several services observe dispatch outcomes without the engine
/// knowing about each one individually.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DispatchEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingHandler {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: DispatchEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dropped_event() -> DispatchEvent {
        DispatchEvent::Dropped {
            event_id: EventId::new(),
            event_type: EventType::from("task.created"),
            reason: DropReason::Unroutable,
        }
    }

    #[tokio::test]
    async fn multicast_reaches_every_subscriber() {
        let mut multicast = MulticastEventHandler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        multicast.add_subscriber(Arc::new(CountingHandler { seen: first.clone() }));
        multicast.add_subscriber(Arc::new(CountingHandler { seen: second.clone() }));
        assert_eq!(multicast.subscriber_count(), 2);

        multicast.handle_event(dropped_event()).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multicast_with_no_subscribers_is_harmless() {
        let multicast = MulticastEventHandler::new();
        multicast.handle_event(dropped_event()).await;
    }

    #[tokio::test]
    async fn no_op_handler_discards_events() {
        NoOpEventHandler::new().handle_event(dropped_event()).await;
    }
}
