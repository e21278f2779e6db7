use crate::event::{Event, EventPriority};
use std::collections::HashMap;
use std::sync::Arc;

/// Custom match predicate evaluated after the declarative filter fields.
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Narrows which events a subscription receives. Every set field must match.
#[derive(Clone, Default)]
pub struct EventFilter {
    /// Exact publisher name.
    pub source: Option<String>,
    /// Lowest priority delivered.
    pub min_priority: Option<EventPriority>,
    /// Metadata entries the event must carry with equal values.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Arbitrary extra check.
    pub predicate: Option<EventPredicate>,
}

impl EventFilter {
    /// A filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the event to come from `source`.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Require at least `priority`.
    pub fn min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Require a metadata entry equal to `value`.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Require `predicate` to return true.
    pub fn predicate(mut self, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether `event` passes every set field.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(source) = &self.source {
            if &event.source != source {
                return false;
            }
        }
        if let Some(min) = self.min_priority {
            if event.priority < min {
                return false;
            }
        }
        let metadata_ok = self
            .metadata
            .iter()
            .all(|(key, value)| event.metadata.get(key) == Some(value));
        if !metadata_ok {
            return false;
        }
        self.predicate.as_ref().map_or(true, |p| p(event))
    }
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter")
            .field("source", &self.source)
            .field("min_priority", &self.min_priority)
            .field("metadata", &self.metadata)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
