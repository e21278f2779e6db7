use crate::event::{kinds, Event};
use crate::filter::EventFilter;
use async_trait::async_trait;
use conductor_core::ConductorResult;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// An async subscriber callback. Returning `Err` triggers the bus retry policy.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> ConductorResult<()>;
}

/// Adapter that turns an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = ConductorResult<()>> + Send,
{
    async fn handle(&self, event: &Event) -> ConductorResult<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConductorResult<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Options accepted by [`crate::EventBus::subscribe_with`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Extra conditions on top of the kind match.
    pub filter: Option<EventFilter>,
    /// Higher weights are delivered first.
    pub priority: i32,
    /// Identity used to match targeted events.
    pub subscriber: Option<String>,
    /// Cancel the subscription after its first delivery.
    pub once: bool,
}

impl SubscribeOptions {
    /// Defaults: no filter, weight 0, no subscriber id, persistent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only deliver events passing `filter`.
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Delivery weight among subscriptions for the same event.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Identify the subscription for targeted events.
    pub fn subscriber(mut self, subscriber: impl Into<String>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    /// Remove the subscription after one delivery.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

pub(crate) struct Subscription {
    pub(crate) id: Uuid,
    pub(crate) kind: String,
    pub(crate) filter: Option<EventFilter>,
    pub(crate) priority_weight: i32,
    pub(crate) subscriber: Option<String>,
    pub(crate) once: bool,
    pub(crate) handler: Arc<dyn EventHandler>,
}

impl Subscription {
    pub(crate) fn new(
        kind: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            filter: options.filter,
            priority_weight: options.priority,
            subscriber: options.subscriber,
            once: options.once,
            handler,
        }
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        if self.kind != kinds::WILDCARD && self.kind != event.kind {
            return false;
        }
        if let Some(target) = &event.target {
            match &self.subscriber {
                Some(subscriber) if target.includes(subscriber) => {}
                _ => return false,
            }
        }
        self.filter.as_ref().map_or(true, |f| f.matches(event))
    }
}
