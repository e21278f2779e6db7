use crate::config::{EventBusConfig, OverflowPolicy};
use crate::event::{kinds, Event, EventPriority};
use crate::subscription::{handler_fn, EventHandler, SubscribeOptions, Subscription};
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, ErrorCode};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BUS_SOURCE: &str = "event-bus";

/// Counters describing bus activity since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Events that went through a processing tick (delivered to zero or more handlers).
    pub processed: u64,
    /// Successful handler deliveries.
    pub delivered: u64,
    /// Events discarded undelivered: overflow drops plus TTL expiries.
    pub dropped: u64,
    /// Events evicted or refused because the queue was full.
    pub overflow_dropped: u64,
    /// Events discarded because their TTL passed before processing.
    pub expired: u64,
    /// Deliveries that failed every attempt.
    pub handler_failures: u64,
    /// Handler attempts after the first.
    pub handler_retries: u64,
    /// Events waiting for the next tick.
    pub queue_length: usize,
    /// Live subscriptions.
    pub subscription_count: usize,
}

/// Filter for [`EventBus::history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Exact event kind.
    pub kind: Option<String>,
    /// Exact publisher name.
    pub source: Option<String>,
    /// Events sharing this correlation id.
    pub correlation_id: Option<String>,
    /// Events at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Matches every retained event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events of `kind`.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Only events published by `source`.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Only events carrying `correlation_id`.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Only events newer than `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Return at most the `limit` newest matches.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.kind.as_ref().map_or(true, |k| &event.kind == k)
            && self.source.as_ref().map_or(true, |s| &event.source == s)
            && self
                .correlation_id
                .as_ref()
                .map_or(true, |c| event.correlation_id.as_ref() == Some(c))
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}

struct BusInner {
    config: EventBusConfig,
    queue: Mutex<VecDeque<Event>>,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    history: Mutex<VecDeque<Event>>,
    stats: Mutex<EventBusStats>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Prioritized publish/subscribe bus.
///
/// `publish` only touches the bounded queue; delivery happens on the
/// processing loop started by [`EventBus::start`], or on explicit
/// [`EventBus::process_pending`] calls. Cloning yields another handle to the
/// same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// A stopped bus; call [`EventBus::start`] to run the processing loop.
    pub fn new(config: EventBusConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusInner {
                config,
                queue: Mutex::new(VecDeque::new()),
                subscriptions: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                stats: Mutex::new(EventBusStats::default()),
                shutdown_tx,
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Events taken per tick; never zero, whatever the configuration says.
    fn batch_size(&self) -> usize {
        self.inner.config.batch_size.max(1)
    }

    /// Enqueue an event for delivery and return its id. Never blocks.
    ///
    /// Under [`OverflowPolicy::RejectNew`] a full queue refuses the event with
    /// an error; under [`OverflowPolicy::DropOldest`] the oldest queued event is
    /// evicted instead.
    pub fn publish(&self, event: Event) -> ConductorResult<Uuid> {
        let id = event.id;
        let config = &self.inner.config;
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= config.max_queue_size {
                let mut stats = self.inner.stats.lock();
                stats.dropped += 1;
                stats.overflow_dropped += 1;
                match config.overflow_policy {
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = queue.pop_front() {
                            warn!(event_id = %evicted.id, kind = %evicted.kind, "Event queue full, dropping oldest event");
                        }
                    }
                    OverflowPolicy::RejectNew => {
                        warn!(event_id = %id, kind = %event.kind, "Event queue full, rejecting event");
                        return Err(ConductorError::EventBus(format!(
                            "event queue full ({} events)",
                            config.max_queue_size
                        )));
                    }
                }
            }
            queue.push_back(event.clone());
        }

        self.record_history(event);
        self.inner.stats.lock().published += 1;
        Ok(id)
    }

    fn record_history(&self, event: Event) {
        let capacity = self.inner.config.history_size;
        if capacity == 0 {
            return;
        }
        let mut history = self.inner.history.lock();
        while history.len() >= capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Subscribe `handler` to events of `kind` (or [`kinds::WILDCARD`]).
    pub fn subscribe(&self, kind: impl Into<String>, handler: Arc<dyn EventHandler>) -> Uuid {
        self.subscribe_with(kind, handler, SubscribeOptions::default())
    }

    /// Subscribe with a filter, delivery weight, subscriber id or once flag.
    pub fn subscribe_with(
        &self,
        kind: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Uuid {
        let subscription = Subscription::new(kind, handler, options);
        let id = subscription.id;
        debug!(subscription_id = %id, kind = %subscription.kind, "Subscription added");
        self.inner.subscriptions.write().push(Arc::new(subscription));
        id
    }

    /// Subscribe for a single delivery.
    pub fn subscribe_once(&self, kind: impl Into<String>, handler: Arc<dyn EventHandler>) -> Uuid {
        self.subscribe_with(kind, handler, SubscribeOptions::new().once())
    }

    /// Cancel a subscription. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != subscription_id);
        subscriptions.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Wait for the next event of `kind`, up to `timeout`.
    ///
    /// Requires the processing loop (or another caller of `process_pending`)
    /// to be running.
    pub async fn wait_for(&self, kind: impl Into<String>, timeout: Duration) -> Option<Event> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let id = self.subscribe_once(
            kind,
            handler_fn(move |event| {
                let tx = tx.clone();
                async move {
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(event);
                    }
                    Ok(())
                }
            }),
        );
        let received = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe(id);
        received.ok().and_then(Result::ok)
    }

    /// Recent events matching `query`, oldest first.
    pub fn history(&self, query: &HistoryQuery) -> Vec<Event> {
        let history = self.inner.history.lock();
        let mut matched: Vec<Event> = history
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        matched
    }

    /// Events waiting for delivery.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> EventBusStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.queue_length = self.queue_len();
        stats.subscription_count = self.subscription_count();
        stats
    }

    /// Run one processing tick: drain up to `batch_size` events, order them by
    /// `(priority desc, timestamp asc)`, drop expired ones and deliver the rest.
    /// Returns the number of events taken off the queue.
    pub async fn process_pending(&self) -> usize {
        let mut batch: Vec<Event> = {
            let mut queue = self.inner.queue.lock();
            let take = queue.len().min(self.batch_size());
            queue.drain(..take).collect()
        };
        let taken = batch.len();
        if taken == 0 {
            return 0;
        }

        batch.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        let now = Utc::now();
        for event in batch {
            if event.is_expired_at(now) {
                debug!(event_id = %event.id, kind = %event.kind, "Event TTL elapsed, dropping");
                let mut stats = self.inner.stats.lock();
                stats.expired += 1;
                stats.dropped += 1;
                continue;
            }
            self.dispatch(&event).await;
            self.inner.stats.lock().processed += 1;
        }
        taken
    }

    async fn dispatch(&self, event: &Event) {
        let mut matching: Vec<Arc<Subscription>> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.matches(event))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority_weight.cmp(&a.priority_weight));

        for subscription in matching {
            // One-shot subscriptions are claimed before delivery so they fire once.
            if subscription.once && !self.unsubscribe(subscription.id) {
                continue;
            }
            self.deliver(&subscription, event).await;
        }
    }

    async fn deliver(&self, subscription: &Subscription, event: &Event) -> bool {
        let config = &self.inner.config;
        let attempts = config.event_retry_attempts.max(1);
        let timeout = Duration::from_millis(config.event_processing_timeout_ms);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match tokio::time::timeout(timeout, subscription.handler.handle(event)).await {
                Ok(Ok(())) => {
                    self.inner.stats.lock().delivered += 1;
                    return true;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "handler timed out after {}ms",
                        config.event_processing_timeout_ms
                    );
                }
            }

            if attempt + 1 < attempts {
                let delay = config.backoff_ms(attempt);
                warn!(
                    subscription_id = %subscription.id,
                    event_id = %event.id,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %last_error,
                    "Event handler failed, retrying"
                );
                self.inner.stats.lock().handler_retries += 1;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        self.inner.stats.lock().handler_failures += 1;
        error!(
            subscription_id = %subscription.id,
            event_id = %event.id,
            kind = %event.kind,
            attempts,
            error = %last_error,
            "Event handler failed after all retries"
        );

        // Failures while delivering an error event are not re-reported.
        if event.kind != kinds::ERROR {
            let report = Event::new(
                kinds::ERROR,
                BUS_SOURCE,
                serde_json::json!({
                    "code": ErrorCode::HandlerError,
                    "subscriptionId": subscription.id,
                    "eventId": event.id,
                    "eventKind": event.kind,
                    "attempts": attempts,
                    "message": last_error,
                }),
            )
            .with_priority(EventPriority::High)
            .with_correlation_id(
                event
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| event.id.to_string()),
            );
            if let Err(e) = self.publish(report) {
                warn!(error = %e, "Could not publish handler error event");
            }
        }
        false
    }

    /// Spawn the processing loop. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let mut handle = self.inner.loop_handle.lock();
        if handle.is_some() {
            return;
        }
        self.inner.shutdown_tx.send_replace(false);
        let bus = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let interval_ms = self.inner.config.processing_interval_ms.max(1);

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        bus.process_pending().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
        info!(interval_ms, "Event bus processing loop started");
    }

    /// Whether the processing loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.loop_handle.lock().is_some()
    }

    /// Stop the processing loop and deliver whatever is still queued.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event bus loop ended abnormally");
            }
        }

        let passes = self.queue_len() / self.batch_size() + 1;
        for _ in 0..passes {
            if self.process_pending().await == 0 {
                break;
            }
        }
        info!(remaining = self.queue_len(), "Event bus stopped");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}
