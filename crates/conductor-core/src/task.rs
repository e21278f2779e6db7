use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling priority of a task. Ordering follows urgency, so
/// `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Ahead of normal traffic.
    High,
    /// Dequeued before anything else.
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of work dispatched to exactly one worker per attempt.
///
/// Everything except `retry_count` is fixed at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable across retries.
    pub id: Uuid,
    /// Task kind, matched against worker capability sets.
    pub kind: String,
    /// Queue ordering key.
    pub priority: TaskPriority,
    /// Opaque input handed to the agent.
    pub payload: serde_json::Value,
    /// Creation time; breaks priority ties FIFO.
    pub created_at: DateTime<Utc>,
    /// Tasks still queued past this instant are dropped.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Attempts made before this one.
    #[serde(default)]
    pub retry_count: u32,
    /// Per-task execution timeout overriding the orchestrator default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Per-task retry budget overriding the orchestrator default.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Restricts eligibility to workers of this kind.
    #[serde(default)]
    pub worker_kind: Option<String>,
}

impl Task {
    /// A medium-priority task with a fresh id.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            priority: TaskPriority::default(),
            payload,
            created_at: Utc::now(),
            expires_at: None,
            retry_count: 0,
            timeout_ms: None,
            max_retries: None,
            worker_kind: None,
        }
    }

    /// Set the queue priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Drop the task if it is still queued at `expires_at`.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire the task `ttl` after its creation time.
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    /// Override the orchestrator's task timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Override the orchestrator's retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Only dispatch to workers of `worker_kind`.
    pub fn with_worker_kind(mut self, worker_kind: impl Into<String>) -> Self {
        self.worker_kind = Some(worker_kind.into());
        self
    }

    /// Whether `expires_at` has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the task has expired as of now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The same task, one attempt later. The id is preserved.
    pub fn next_attempt(&self) -> Self {
        let mut task = self.clone();
        task.retry_count += 1;
        task
    }
}
