//! Event queue and dispatch loop.
//!
//! [`WebhookDispatcher`] is the inbound surface of the engine: producers call
//! [`dispatch`](WebhookDispatcher::dispatch) (or a typed wrapper) and return
//! immediately. Events land on an unbounded channel drained by a single
//! consumer task in strict FIFO order. Per event, the loop resolves
//! subscriptions, shapes the envelope once, fans out one delivery task per
//! matching subscription, and only dequeues the next event after every
//! fan-out delivery has reached a terminal state.
//!
//! Construct one dispatcher at process startup and hand references to every
//! producer call site; there is deliberately no global instance.

use std::sync::{
    atomic::{AtomicU8, AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{
    sync::{mpsc, Notify, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tasklane_core::{
    event_types, Clock, DispatchEvent, DomainEvent, DropReason, EventHandler, EventType,
    NoOpEventHandler,
};

use crate::{
    client::{ClientConfig, DeliveryClient},
    delivery::DeliveryWorker,
    error::Result,
    payload::PayloadBuilder,
    resolver::{extract_project_id, SubscriptionResolver},
    retry::RetryPolicy,
};

/// Configuration for the webhook dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// HTTP client settings shared by all deliveries.
    pub client: ClientConfig,

    /// Retry policy applied to every delivery.
    pub retry: RetryPolicy,
}

/// Counters for dispatch monitoring.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Events fully processed by the loop (including zero-subscriber ones).
    pub events_processed: u64,
    /// Events dropped before fan-out (unroutable or resolver failure).
    pub events_dropped: u64,
    /// Deliveries that reached terminal success.
    pub deliveries_succeeded: u64,
    /// Deliveries that reached terminal failure.
    pub deliveries_failed: u64,
    /// Deliveries currently in flight.
    pub in_flight_deliveries: u64,
}

/// Observable state of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// The queue is empty and the loop is parked.
    Idle,
    /// The loop is processing an event.
    Draining,
}

const STATE_IDLE: u8 = 0;
const STATE_DRAINING: u8 = 1;

/// Fire-and-forget entry point for webhook dispatch.
///
/// Cheap to share behind an `Arc`. Enqueueing is O(1), lock-free for
/// producers, and never blocks: delivery outcomes are observability-only and
/// reach interested parties through logs, [`DispatcherStats`], and the
/// [`EventHandler`] side channel.
#[derive(Debug)]
pub struct WebhookDispatcher {
    tx: mpsc::UnboundedSender<DomainEvent>,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<DispatcherStats>>,
    state: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
    idle_notify: Arc<Notify>,
    cancellation_token: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    /// Creates a dispatcher and starts its dispatch loop.
    ///
    /// Must be called from within a Tokio runtime; the loop is spawned onto
    /// it. Delivery outcomes are observable through logs and stats only; use
    /// [`with_event_handler`](Self::with_event_handler) to subscribe a side
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(
        resolver: Arc<dyn SubscriptionResolver>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::with_event_handler(resolver, config, clock, Arc::new(NoOpEventHandler::new()))
    }

    /// Creates a dispatcher with an event handler observing outcomes.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_event_handler(
        resolver: Arc<dyn SubscriptionResolver>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client.clone())?);
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(DispatcherStats::default()));
        let state = Arc::new(AtomicU8::new(STATE_IDLE));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle_notify = Arc::new(Notify::new());
        let cancellation_token = CancellationToken::new();

        let dispatch_loop = DispatchLoop {
            rx,
            resolver,
            builder: PayloadBuilder::new(),
            client,
            policy: config.retry,
            clock: clock.clone(),
            handler,
            stats: stats.clone(),
            state: state.clone(),
            pending: pending.clone(),
            idle_notify: idle_notify.clone(),
            cancellation_token: cancellation_token.clone(),
        };
        let loop_handle = tokio::spawn(dispatch_loop.run());

        Ok(Self {
            tx,
            clock,
            stats,
            state,
            pending,
            idle_notify,
            cancellation_token,
            loop_handle: Mutex::new(Some(loop_handle)),
        })
    }

    /// Enqueues a domain event for webhook dispatch.
    ///
    /// Returns immediately; the caller never observes delivery outcomes. If
    /// the dispatcher has been shut down the event is dropped with a warning.
    pub fn dispatch(&self, event_type: impl Into<EventType>, data: Value) {
        let event = DomainEvent::new(event_type.into(), data, self.clock.now_utc());

        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.tx.send(event) {
            self.finish_pending();
            warn!(
                event_type = %e.0.event_type,
                event_id = %e.0.id,
                "dispatcher stopped, dropping webhook event"
            );
        }
    }

    /// Current loop state.
    pub fn state(&self) -> DispatcherState {
        match self.state.load(Ordering::Acquire) {
            STATE_DRAINING => DispatcherState::Draining,
            _ => DispatcherState::Idle,
        }
    }

    /// Snapshot of the dispatch counters.
    pub async fn stats(&self) -> DispatcherStats {
        self.stats.read().await.clone()
    }

    /// Waits until every event dispatched so far has fully settled.
    ///
    /// Settled means dropped or fanned out with all deliveries terminal.
    /// Intended for tests and for quiescing before shutdown; new dispatches
    /// during the wait extend it.
    pub async fn settled(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops the dispatch loop and waits for it to exit.
    ///
    /// The event currently being processed finishes its fan-out; events
    /// still queued behind it are discarded, consistent with the non-durable
    /// at-most-attempted contract.
    pub async fn shutdown(self) {
        info!("shutting down webhook dispatcher");
        self.cancellation_token.cancel();

        let handle = self.loop_handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatch loop terminated abnormally");
            }
        }
        info!("webhook dispatcher stopped");
    }

    fn finish_pending(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle_notify.notify_waiters();
        }
    }
}

/// Typed convenience wrappers assembling event payloads for `dispatch`.
impl WebhookDispatcher {
    /// Dispatches `task.created`.
    pub fn task_created(
        &self,
        task: &impl Serialize,
        user: &impl Serialize,
        project: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::TASK_CREATED,
            [
                ("task", serde_json::to_value(task)),
                ("user", serde_json::to_value(user)),
                ("project", serde_json::to_value(project)),
            ],
        );
    }

    /// Dispatches `task.updated` with the changed fields.
    pub fn task_updated(
        &self,
        task: &impl Serialize,
        changes: &impl Serialize,
        user: &impl Serialize,
        project: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::TASK_UPDATED,
            [
                ("task", serde_json::to_value(task)),
                ("changes", serde_json::to_value(changes)),
                ("user", serde_json::to_value(user)),
                ("project", serde_json::to_value(project)),
            ],
        );
    }

    /// Dispatches `task.status_changed`.
    pub fn task_status_changed(
        &self,
        task: &impl Serialize,
        old_status: &str,
        new_status: &str,
        user: &impl Serialize,
        project: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::TASK_STATUS_CHANGED,
            [
                ("task", serde_json::to_value(task)),
                ("old_status", Ok(Value::String(old_status.to_string()))),
                ("new_status", Ok(Value::String(new_status.to_string()))),
                ("user", serde_json::to_value(user)),
                ("project", serde_json::to_value(project)),
            ],
        );
    }

    /// Dispatches `task.deleted`.
    pub fn task_deleted(
        &self,
        task: &impl Serialize,
        user: &impl Serialize,
        project: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::TASK_DELETED,
            [
                ("task", serde_json::to_value(task)),
                ("user", serde_json::to_value(user)),
                ("project", serde_json::to_value(project)),
            ],
        );
    }

    /// Dispatches `comment.created`.
    pub fn comment_created(
        &self,
        comment: &impl Serialize,
        task: &impl Serialize,
        user: &impl Serialize,
        project: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::COMMENT_CREATED,
            [
                ("comment", serde_json::to_value(comment)),
                ("task", serde_json::to_value(task)),
                ("user", serde_json::to_value(user)),
                ("project", serde_json::to_value(project)),
            ],
        );
    }

    /// Dispatches `project.updated`.
    pub fn project_updated(
        &self,
        project: &impl Serialize,
        changes: &impl Serialize,
        user: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::PROJECT_UPDATED,
            [
                ("project", serde_json::to_value(project)),
                ("changes", serde_json::to_value(changes)),
                ("user", serde_json::to_value(user)),
            ],
        );
    }

    /// Dispatches `project.member_added`.
    pub fn member_added(
        &self,
        project: &impl Serialize,
        member: &impl Serialize,
        added_by: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::MEMBER_ADDED,
            [
                ("project", serde_json::to_value(project)),
                ("member", serde_json::to_value(member)),
                ("added_by", serde_json::to_value(added_by)),
            ],
        );
    }

    /// Dispatches `project.member_removed`.
    pub fn member_removed(
        &self,
        project: &impl Serialize,
        member: &impl Serialize,
        removed_by: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::MEMBER_REMOVED,
            [
                ("project", serde_json::to_value(project)),
                ("member", serde_json::to_value(member)),
                ("removed_by", serde_json::to_value(removed_by)),
            ],
        );
    }

    /// Dispatches `project.member_role_changed`.
    pub fn member_role_changed(
        &self,
        project: &impl Serialize,
        member: &impl Serialize,
        old_role: &str,
        new_role: &str,
        changed_by: &impl Serialize,
    ) {
        self.dispatch_parts(
            event_types::MEMBER_ROLE_CHANGED,
            [
                ("project", serde_json::to_value(project)),
                ("member", serde_json::to_value(member)),
                ("old_role", Ok(Value::String(old_role.to_string()))),
                ("new_role", Ok(Value::String(new_role.to_string()))),
                ("changed_by", serde_json::to_value(changed_by)),
            ],
        );
    }

    /// Assembles an event payload from named parts and dispatches it.
    ///
    /// An unserializable part drops the whole event with a warning, keeping
    /// the fire-and-forget contract instead of surfacing an error nobody
    /// awaits.
    fn dispatch_parts<const N: usize>(
        &self,
        event_type: &str,
        parts: [(&'static str, serde_json::Result<Value>); N],
    ) {
        let mut data = Map::new();
        for (key, value) in parts {
            match value {
                Ok(value) => {
                    data.insert(key.to_string(), value);
                },
                Err(e) => {
                    warn!(
                        event_type,
                        field = key,
                        error = %e,
                        "dropping webhook event, payload field not serializable"
                    );
                    return;
                },
            }
        }
        self.dispatch(event_type, Value::Object(data));
    }
}

/// Single-consumer drain over the event queue.
struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<DomainEvent>,
    resolver: Arc<dyn SubscriptionResolver>,
    builder: PayloadBuilder,
    client: Arc<DeliveryClient>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn EventHandler>,
    stats: Arc<RwLock<DispatcherStats>>,
    state: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
    idle_notify: Arc<Notify>,
    cancellation_token: CancellationToken,
}

impl DispatchLoop {
    async fn run(mut self) {
        info!("webhook dispatch loop started");

        loop {
            self.state.store(STATE_IDLE, Ordering::Release);

            tokio::select! {
                maybe_event = self.rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    self.state.store(STATE_DRAINING, Ordering::Release);
                    self.process_event(event).await;
                    if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.idle_notify.notify_waiters();
                    }
                },
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("webhook dispatch loop stopped");
    }

    /// Routes, fans out, and settles one event.
    ///
    /// Every failure here is contained: routing problems drop the event,
    /// delivery failures and panics stay inside their own task, and the loop
    /// always advances to the next event.
    async fn process_event(&self, event: DomainEvent) {
        let Some(project_id) = extract_project_id(&event.data) else {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "dropping webhook event, no project id in payload"
            );
            self.drop_event(&event, DropReason::Unroutable).await;
            return;
        };

        let subscriptions =
            match self.resolver.resolve(project_id, &event.event_type).await {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        project_id = %project_id,
                        error = %e,
                        "dropping webhook event, subscription lookup failed"
                    );
                    self.drop_event(&event, DropReason::ResolverFailed(e.to_string())).await;
                    return;
                },
            };

        // Resolvers are external code; re-check the targeting invariant.
        let targets: Vec<_> =
            subscriptions.into_iter().filter(|s| s.wants(&event.event_type)).collect();

        if targets.is_empty() {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no matching subscriptions"
            );
            self.stats.write().await.events_processed += 1;
            return;
        }

        // Shape once per event; each worker finalizes its own copy.
        let envelope = self.builder.shape(&event.event_type, &event.data);

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            fan_out = targets.len(),
            "fanning out webhook deliveries"
        );

        let handles: Vec<_> = targets
            .into_iter()
            .map(|subscription| {
                let worker = DeliveryWorker::new(
                    event.id,
                    event.event_type.clone(),
                    envelope.clone(),
                    subscription,
                    self.client.clone(),
                    self.policy.clone(),
                    self.clock.clone(),
                    self.handler.clone(),
                    self.stats.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        // Gate on all fan-out deliveries reaching a terminal state before the
        // next event is dequeued. Individual failures are already recorded by
        // the workers; a panicked task only loses its own delivery.
        for joined in join_all(handles).await {
            match joined {
                Ok(report) => {
                    debug!(
                        delivery_id = %report.delivery_id,
                        subscription_id = %report.subscription_id,
                        outcome = ?report.outcome,
                        "delivery settled"
                    );
                },
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "delivery task aborted");
                },
            }
        }

        self.stats.write().await.events_processed += 1;
    }

    async fn drop_event(&self, event: &DomainEvent, reason: DropReason) {
        self.stats.write().await.events_dropped += 1;
        self.handler
            .handle_event(DispatchEvent::Dropped {
                event_id: event.id,
                event_type: event.event_type.clone(),
                reason,
            })
            .await;
    }
}
