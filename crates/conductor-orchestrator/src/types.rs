use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Lifecycle status of a worker runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// The agent is being initialized.
    Initializing,
    /// Serving and working through its queue.
    Active,
    /// Serving with an empty queue.
    Idle,
    /// Executing a task; derived from the running task, never stored.
    Processing,
    /// Initialization failed; not serving.
    Error,
    /// Out of rotation on request.
    Maintenance,
    /// Stopped for good.
    Shutdown,
}

impl WorkerStatus {
    /// Only active and idle workers are handed new tasks.
    pub fn is_selectable(self) -> bool {
        matches!(self, WorkerStatus::Active | WorkerStatus::Idle)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Initializing => "initializing",
            WorkerStatus::Active => "active",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Error => "error",
            WorkerStatus::Maintenance => "maintenance",
            WorkerStatus::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Metrics tracked per worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    /// Attempts recorded, including validation rejections.
    pub total_requests: u64,
    /// Attempts that succeeded.
    pub successful_requests: u64,
    /// Attempts that failed.
    pub failed_requests: u64,
    /// Running mean over all completed attempts.
    pub avg_response_time_ms: f64,
    /// `failed_requests / total_requests`, zero before the first request.
    pub error_rate: f64,
    /// Share of time since (re)start not spent in `error` status.
    pub uptime_pct: f64,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time_ms: 0.0,
            error_rate: 0.0,
            uptime_pct: 100.0,
            last_error: None,
        }
    }
}

impl WorkerMetrics {
    /// Fold one finished attempt into the counters.
    pub fn record(&mut self, duration_ms: u64, error: Option<String>) {
        self.total_requests += 1;
        match error {
            None => self.successful_requests += 1,
            Some(e) => {
                self.failed_requests += 1;
                self.last_error = Some(e);
            }
        }
        let n = self.total_requests as f64;
        self.avg_response_time_ms += (duration_ms as f64 - self.avg_response_time_ms) / n;
        self.error_rate = self.failed_requests as f64 / n;
    }
}

/// Point-in-time view of a worker runtime. Pure read; never waits on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    /// Registry id.
    pub id: String,
    /// Agent kind.
    pub kind: String,
    /// Task kinds the worker accepts.
    pub capabilities: BTreeSet<String>,
    /// Effective status.
    pub status: WorkerStatus,
    /// Metrics as of the snapshot.
    pub metrics: WorkerMetrics,
    /// Tasks waiting behind the running one.
    pub queue_length: usize,
    /// Task being executed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Uuid>,
}

/// A worker as seen through the orchestrator registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRegistration {
    /// Registry id.
    pub id: String,
    /// Agent kind.
    pub kind: String,
    /// Task kinds the worker accepts.
    pub capabilities: BTreeSet<String>,
    /// Effective status.
    pub status: WorkerStatus,
    /// Metrics as of the snapshot.
    pub metrics: WorkerMetrics,
    /// Workers this one was registered as depending on.
    pub dependencies: BTreeSet<String>,
    /// Tasks waiting behind the running one.
    pub queue_length: usize,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Outcome of the most recent health check, if one has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
}

/// Result of pinging one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    /// Worker that was pinged.
    pub worker_id: String,
    /// Effective status at ping time.
    pub status: WorkerStatus,
    /// The agent's own verdict.
    pub agent_healthy: bool,
    /// The agent's status label.
    pub agent_status: String,
    /// Metrics at ping time.
    pub metrics: WorkerMetrics,
    /// Tasks waiting at ping time.
    pub queue_length: usize,
    /// When the ping completed.
    pub checked_at: DateTime<Utc>,
}

impl WorkerHealth {
    /// Healthy unless the worker is in `error`, the agent reports a problem, or
    /// the error rate exceeds `max_error_rate` once `min_requests` have been seen.
    pub fn is_healthy(&self, max_error_rate: f64, min_requests: u64) -> bool {
        if self.status == WorkerStatus::Error || !self.agent_healthy {
            return false;
        }
        !(self.metrics.total_requests >= min_requests && self.metrics.error_rate > max_error_rate)
    }
}

/// Aggregate health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every worker is available.
    Healthy,
    /// Some workers are unavailable.
    Degraded,
    /// No worker is available.
    Unhealthy,
}

/// Snapshot returned by `get_system_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    /// Overall classification.
    pub status: HealthStatus,
    /// Registered workers.
    pub total_workers: usize,
    /// Workers that are serving (active, idle or processing) and did not fail
    /// their last health check.
    pub available_workers: usize,
    /// Per-worker detail.
    pub workers: Vec<WorkerRegistration>,
    /// Time since the orchestrator was created.
    pub uptime_ms: u64,
    /// When the snapshot was taken.
    pub checked_at: DateTime<Utc>,
}

/// Snapshot returned by `get_metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// `distribute` calls received.
    pub total_tasks: u64,
    /// Calls that ended in success.
    pub completed_tasks: u64,
    /// Calls that ended in failure after every attempt.
    pub failed_tasks: u64,
    /// Re-attempts made.
    pub retries: u64,
    /// Attempts that lost the race against their timeout.
    pub timeouts: u64,
    /// Attempts with no eligible worker.
    pub distribution_errors: u64,
    /// Mean processing time of finished calls.
    pub avg_processing_time_ms: f64,
    /// Calls currently in flight.
    pub active_tasks: usize,
    /// Tasks waiting in worker queues.
    pub queued_tasks: usize,
    /// Registered workers.
    pub workers: usize,
}

/// Summary of one health-check sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Workers pinged.
    pub checked: usize,
    /// Workers that passed.
    pub healthy: usize,
    /// Ids of workers that failed.
    pub unhealthy: Vec<String>,
    /// Ids of workers that were reset.
    pub restarted: Vec<String>,
}
