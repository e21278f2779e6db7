//! Prioritized publish/subscribe event bus for the Conductor runtime.
//!
//! Publishers push [`Event`]s into a bounded queue without blocking. A single
//! processing loop drains the queue in batches, orders each batch by priority,
//! and delivers every event to its matching subscriptions with per-handler
//! timeouts and exponential-backoff retries.
//!
//! # Main types
//!
//! - [`EventBus`] — The bus itself: publish, subscribe, history, stats.
//! - [`Event`] — A broadcast state change with priority, TTL and optional target.
//! - [`EventFilter`] — Source/priority/metadata/predicate filter for subscriptions.
//! - [`EventHandler`] — Async subscriber callback; see [`handler_fn`].
//! - [`EventBusConfig`] — Queue bounds, batching, retry and history settings.

/// The event bus and its processing loop.
pub mod bus;
/// Bus configuration.
pub mod config;
/// Event type and well-known event kinds.
pub mod event;
/// Subscription filters.
pub mod filter;
/// Subscription handlers and options.
pub mod subscription;

pub use bus::{EventBus, EventBusStats, HistoryQuery};
pub use config::{EventBusConfig, OverflowPolicy};
pub use event::{kinds, Event, EventPriority, EventTarget};
pub use filter::{EventFilter, EventPredicate};
pub use subscription::{handler_fn, EventHandler, FnHandler, SubscribeOptions};
