use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known event kinds published by the runtime.
pub mod kinds {
    /// Matches every event kind when used as a subscription kind.
    pub const WILDCARD: &str = "*";
    /// A worker joined the registry.
    pub const WORKER_REGISTERED: &str = "worker-registered";
    /// A worker left the registry.
    pub const WORKER_UNREGISTERED: &str = "worker-unregistered";
    /// A worker was reset, manually or by a health check.
    pub const WORKER_RESTARTED: &str = "worker-restarted";
    /// A distributed task succeeded.
    pub const TASK_COMPLETED: &str = "task-completed";
    /// A distributed task failed after its last attempt.
    pub const TASK_FAILED: &str = "task-failed";
    /// A health sweep finished; the payload is its report.
    pub const HEALTH_CHECK_COMPLETED: &str = "health-check-completed";
    /// A validated workflow began running.
    pub const WORKFLOW_STARTED: &str = "workflow-started";
    /// One workflow step succeeded.
    pub const WORKFLOW_STEP_COMPLETED: &str = "workflow-step-completed";
    /// Every step of a workflow succeeded.
    pub const WORKFLOW_COMPLETED: &str = "workflow-completed";
    /// A workflow failed or was cancelled.
    pub const WORKFLOW_FAILED: &str = "workflow-failed";
    /// Published by the bus when a handler exhausts its retries.
    pub const ERROR: &str = "error";
}

/// Delivery priority of an event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Informational.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Failures and other events worth acting on.
    High,
    /// Delivered first within a batch.
    Critical,
}

/// Addressee(s) of a targeted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTarget {
    /// A single subscriber id.
    One(String),
    /// Any of several subscriber ids.
    Many(Vec<String>),
}

impl EventTarget {
    /// Whether `id` is addressed.
    pub fn includes(&self, id: &str) -> bool {
        match self {
            EventTarget::One(target) => target == id,
            EventTarget::Many(targets) => targets.iter().any(|t| t == id),
        }
    }
}

/// A broadcast state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique per event.
    pub id: Uuid,
    /// Event kind, see [`kinds`].
    pub kind: String,
    /// Name of the publishing component.
    pub source: String,
    /// Restricts delivery to the named subscribers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventTarget>,
    /// Kind-specific body.
    pub payload: serde_json::Value,
    /// Publish time; orders events of equal priority.
    pub timestamp: DateTime<Utc>,
    /// Delivery order within a batch.
    #[serde(default)]
    pub priority: EventPriority,
    /// Maximum age in milliseconds before the event is discarded undelivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Groups events that belong to one task or workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Free-form attributes matched by [`crate::EventFilter`].
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// A normal-priority broadcast event stamped now.
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            source: source.into(),
            target: None,
            payload,
            timestamp: Utc::now(),
            priority: EventPriority::default(),
            ttl_ms: None,
            correlation_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Address the event to specific subscribers.
    pub fn with_target(mut self, target: EventTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Discard the event if still queued `ttl_ms` after its timestamp.
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Tie the event to a task or workflow.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the event has outlived its TTL at `now`. A TTL of zero is
    /// always expired by the time it is processed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => {
                let age_ms = (now - self.timestamp).num_milliseconds().max(0);
                age_ms as u64 >= ttl
            }
            None => false,
        }
    }
}
