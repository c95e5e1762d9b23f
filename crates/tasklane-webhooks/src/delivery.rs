//! Per-delivery retry state machine.
//!
//! One [`DeliveryWorker`] owns the full attempt series for a single
//! (event, subscription) pair. The envelope is finalized and serialized once,
//! the signature computed once, and the identical bytes are re-sent on every
//! attempt so receivers can deduplicate by signature or delivery ID. Backoff
//! sleeps go through the injected clock and are scoped to this worker's task;
//! they never block the dispatch loop or sibling deliveries.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use tasklane_core::{
    AttemptOutcome, Clock, DeliveryAttempt, DeliveryId, DispatchEvent, EventHandler, EventId,
    EventType, SubscriptionId, WebhookSubscription,
};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    dispatcher::DispatcherStats,
    error::DeliveryError,
    payload::PayloadEnvelope,
    retry::{RetryDecision, RetryPolicy},
    signer,
};

/// State of a delivery as it moves through its attempt series.
///
/// `Pending → Sending → {Success, RetryScheduled, Failed}`, with
/// `RetryScheduled → Sending` once the backoff elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// No attempt issued yet.
    Pending,
    /// An HTTP attempt is in flight.
    Sending,
    /// Waiting out the backoff before the next attempt.
    RetryScheduled,
    /// Terminal: endpoint acknowledged with 2xx.
    Success,
    /// Terminal: rejected, exhausted, or unsendable.
    Failed,
}

/// Terminal outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint acknowledged the payload.
    Success {
        /// HTTP status of the accepting response.
        status: u16,
    },
    /// The delivery was abandoned.
    Failed {
        /// Last HTTP status, when the endpoint responded at all.
        status: Option<u16>,
        /// Description of the final error.
        error: String,
    },
}

/// Summary of a completed delivery, surfaced to the dispatch loop.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Delivery identifier shared by all attempts.
    pub delivery_id: DeliveryId,
    /// Subscription delivered to.
    pub subscription_id: SubscriptionId,
    /// Domain event this delivery carried.
    pub event_id: EventId,
    /// Terminal outcome.
    pub outcome: DeliveryOutcome,
    /// Every attempt made, in order.
    pub attempts: Vec<DeliveryAttempt>,
}

/// Owns the retry state machine for one (event, subscription) pair.
pub struct DeliveryWorker {
    event_id: EventId,
    event_type: EventType,
    envelope: PayloadEnvelope,
    subscription: WebhookSubscription,
    client: Arc<DeliveryClient>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn EventHandler>,
    stats: Arc<RwLock<DispatcherStats>>,
    state: DeliveryState,
}

impl DeliveryWorker {
    /// Creates a worker for one fan-out delivery.
    ///
    /// `envelope` is the shaped-but-unfinalized envelope shared by the
    /// event's fan-out; this worker stamps its own delivery ID and timestamp
    /// onto its copy.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        event_type: EventType,
        envelope: PayloadEnvelope,
        subscription: WebhookSubscription,
        client: Arc<DeliveryClient>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn EventHandler>,
        stats: Arc<RwLock<DispatcherStats>>,
    ) -> Self {
        Self {
            event_id,
            event_type,
            envelope,
            subscription,
            client,
            policy,
            clock,
            handler,
            stats,
            state: DeliveryState::Pending,
        }
    }

    /// Runs the delivery to a terminal state.
    ///
    /// Never returns an error: every failure mode ends in a
    /// [`DeliveryOutcome::Failed`] report. Outcomes reach observers through
    /// the event handler and stats; nothing propagates to the producer.
    pub async fn run(mut self) -> DeliveryReport {
        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let report = self.deliver().await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries -= 1;
            match report.outcome {
                DeliveryOutcome::Success { .. } => stats.deliveries_succeeded += 1,
                DeliveryOutcome::Failed { .. } => stats.deliveries_failed += 1,
            }
        }

        report
    }

    async fn deliver(&mut self) -> DeliveryReport {
        let delivery_id = DeliveryId::new();

        // Finalize once: all attempts of this delivery share the exact bytes,
        // and the signature is computed over them after finalization.
        self.envelope.finalize(delivery_id, self.clock.as_ref());
        let body = match self.envelope.to_bytes() {
            Ok(body) => body,
            Err(e) => return self.fail_unsendable(delivery_id, e).await,
        };

        let signature = match self.subscription.secret.as_deref() {
            Some(secret) => match signer::signature_header(secret, &body) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    let error = DeliveryError::configuration(format!(
                        "cannot sign delivery for subscription {}: {e}",
                        self.subscription.id
                    ));
                    return self.fail_unsendable(delivery_id, error).await;
                },
            },
            None => None,
        };

        let mut attempts = Vec::new();
        let mut attempt_number = 1u32;

        loop {
            self.state = DeliveryState::Sending;
            self.handler
                .handle_event(DispatchEvent::AttemptStarted {
                    delivery_id,
                    subscription_id: self.subscription.id,
                    event_id: self.event_id,
                    attempt_number,
                    started_at: self.clock.now_utc(),
                })
                .await;

            debug!(
                delivery_id = %delivery_id,
                subscription_id = %self.subscription.id,
                attempt = attempt_number,
                "attempting webhook delivery"
            );

            let request = DeliveryRequest {
                delivery_id,
                event_type: self.event_type.to_string(),
                url: self.subscription.url.clone(),
                body: body.clone(),
                signature: signature.clone(),
                attempt_number,
            };

            let error = match self.client.deliver(request).await {
                Ok(response) if response.is_success => {
                    attempts.push(self.attempt_record(
                        delivery_id,
                        attempt_number,
                        AttemptOutcome::Success,
                        Some(response.status_code),
                        None,
                    ));
                    return self.succeed(delivery_id, response.status_code, attempts).await;
                },
                Ok(response) if (400..500).contains(&response.status_code) => {
                    DeliveryError::client_error(response.status_code, response.body)
                },
                Ok(response) => DeliveryError::server_error(response.status_code, response.body),
                Err(e) => e,
            };

            match self.policy.decide(attempt_number, &error) {
                RetryDecision::Retry { delay } => {
                    attempts.push(self.attempt_record(
                        delivery_id,
                        attempt_number,
                        AttemptOutcome::RetryScheduled,
                        error.status(),
                        Some(error.to_string()),
                    ));
                    warn!(
                        delivery_id = %delivery_id,
                        subscription_id = %self.subscription.id,
                        attempt = attempt_number,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "delivery failed, retry scheduled"
                    );

                    self.state = DeliveryState::RetryScheduled;
                    self.clock.sleep(delay).await;
                    attempt_number += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    attempts.push(self.attempt_record(
                        delivery_id,
                        attempt_number,
                        AttemptOutcome::Failed,
                        error.status(),
                        Some(error.to_string()),
                    ));
                    return self.fail(delivery_id, error, reason, attempts).await;
                },
            }
        }
    }

    async fn succeed(
        &mut self,
        delivery_id: DeliveryId,
        status: u16,
        attempts: Vec<DeliveryAttempt>,
    ) -> DeliveryReport {
        self.state = DeliveryState::Success;
        let attempt_number = attempts.len() as u32;

        info!(
            delivery_id = %delivery_id,
            subscription_id = %self.subscription.id,
            status,
            attempts = attempt_number,
            "webhook delivered"
        );

        self.handler
            .handle_event(DispatchEvent::Succeeded {
                delivery_id,
                subscription_id: self.subscription.id,
                event_id: self.event_id,
                status,
                attempt_number,
                delivered_at: self.clock.now_utc(),
            })
            .await;

        DeliveryReport {
            delivery_id,
            subscription_id: self.subscription.id,
            event_id: self.event_id,
            outcome: DeliveryOutcome::Success { status },
            attempts,
        }
    }

    async fn fail(
        &mut self,
        delivery_id: DeliveryId,
        error: DeliveryError,
        reason: String,
        attempts: Vec<DeliveryAttempt>,
    ) -> DeliveryReport {
        self.state = DeliveryState::Failed;

        error!(
            delivery_id = %delivery_id,
            subscription_id = %self.subscription.id,
            attempts = attempts.len(),
            reason = %reason,
            error = %error,
            "webhook delivery permanently failed"
        );

        self.handler
            .handle_event(DispatchEvent::Failed {
                delivery_id,
                subscription_id: self.subscription.id,
                event_id: self.event_id,
                status: error.status(),
                attempts: attempts.len() as u32,
                error: error.to_string(),
                failed_at: self.clock.now_utc(),
            })
            .await;

        DeliveryReport {
            delivery_id,
            subscription_id: self.subscription.id,
            event_id: self.event_id,
            outcome: DeliveryOutcome::Failed { status: error.status(), error: error.to_string() },
            attempts,
        }
    }

    /// Terminal failure before any HTTP attempt could be issued.
    async fn fail_unsendable(
        &mut self,
        delivery_id: DeliveryId,
        error: DeliveryError,
    ) -> DeliveryReport {
        let attempts = vec![self.attempt_record(
            delivery_id,
            0,
            AttemptOutcome::Failed,
            None,
            Some(error.to_string()),
        )];
        self.fail(delivery_id, error, "delivery could not be prepared".to_string(), attempts)
            .await
    }

    fn attempt_record(
        &self,
        delivery_id: DeliveryId,
        attempt_number: u32,
        outcome: AttemptOutcome,
        http_status: Option<u16>,
        error: Option<String>,
    ) -> DeliveryAttempt {
        DeliveryAttempt {
            delivery_id,
            subscription_id: self.subscription.id,
            attempt_number,
            outcome,
            http_status,
            error,
        }
    }

    /// Current state, for tests and diagnostics.
    pub fn state(&self) -> DeliveryState {
        self.state
    }
}
