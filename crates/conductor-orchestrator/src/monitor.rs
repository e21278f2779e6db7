use crate::types::{WorkerMetrics, WorkerStatus};
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct MonitorState {
    /// Lifecycle status, independent of whether a task is running.
    base: WorkerStatus,
    current_task: Option<Uuid>,
    /// Bumped by every reset; attempts started under an older value are not recorded.
    generation: u64,
    metrics: WorkerMetrics,
    started_at: Instant,
    error_since: Option<Instant>,
    downtime: Duration,
}

impl MonitorState {
    fn fresh(base: WorkerStatus) -> Self {
        Self {
            base,
            current_task: None,
            generation: 0,
            metrics: WorkerMetrics::default(),
            started_at: Instant::now(),
            error_since: None,
            downtime: Duration::ZERO,
        }
    }

    fn uptime_pct(&self, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.started_at);
        if elapsed.is_zero() {
            return 100.0;
        }
        let mut down = self.downtime;
        if let Some(since) = self.error_since {
            down += now.duration_since(since);
        }
        let up = elapsed.saturating_sub(down);
        up.as_secs_f64() / elapsed.as_secs_f64() * 100.0
    }
}

/// Tracks status and metrics for a single worker runtime.
///
/// Reads take a short synchronous lock and never wait on the task queue.
pub struct WorkerMonitor {
    state: RwLock<MonitorState>,
}

impl WorkerMonitor {
    /// A monitor in `initializing` with zeroed metrics.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MonitorState::fresh(WorkerStatus::Initializing)),
        }
    }

    /// Effective status: `processing` while a task runs, the lifecycle status otherwise.
    pub fn status(&self) -> WorkerStatus {
        let state = self.state.read();
        if state.current_task.is_some() && state.base.is_selectable() {
            WorkerStatus::Processing
        } else {
            state.base
        }
    }

    /// Lifecycle status without the `processing` overlay.
    pub fn base_status(&self) -> WorkerStatus {
        self.state.read().base
    }

    /// Set the lifecycle status, accounting time spent in `error` as downtime.
    pub fn set_status(&self, status: WorkerStatus) {
        let mut state = self.state.write();
        let now = Instant::now();
        if state.base == WorkerStatus::Error && status != WorkerStatus::Error {
            if let Some(since) = state.error_since.take() {
                state.downtime += now.duration_since(since);
            }
        }
        if status == WorkerStatus::Error && state.error_since.is_none() {
            state.error_since = Some(now);
        }
        state.base = status;
    }

    /// Move between `active` and `idle` without overriding any other lifecycle status.
    pub fn set_availability(&self, busy: bool) {
        let mut state = self.state.write();
        if state.base.is_selectable() {
            state.base = if busy {
                WorkerStatus::Active
            } else {
                WorkerStatus::Idle
            };
        }
    }

    /// Mark `task_id` as running and return the generation to pass to
    /// [`WorkerMonitor::finish_task`].
    pub fn start_task(&self, task_id: Uuid) -> u64 {
        let mut state = self.state.write();
        state.current_task = Some(task_id);
        state.generation
    }

    /// Record a finished attempt; `error` is `None` on success.
    ///
    /// Returns `false` without touching the metrics when the worker was reset
    /// after the attempt started.
    pub fn finish_task(&self, generation: u64, duration_ms: u64, error: Option<String>) -> bool {
        let mut state = self.state.write();
        state.current_task = None;
        if state.generation != generation {
            return false;
        }
        state.metrics.record(duration_ms, error);
        true
    }

    /// Record an attempt that was rejected before execution.
    pub fn record_rejection(&self, error: String) {
        self.state.write().metrics.record(0, Some(error));
    }

    /// Store `error` as the last error without counting a request.
    pub fn record_error(&self, error: String) {
        self.state.write().metrics.last_error = Some(error);
    }

    /// Id of the task being executed, if any.
    pub fn current_task(&self) -> Option<Uuid> {
        self.state.read().current_task
    }

    /// Whether a task is being executed right now.
    pub fn is_processing(&self) -> bool {
        self.state.read().current_task.is_some()
    }

    /// Metrics snapshot with uptime computed as of now.
    pub fn metrics(&self) -> WorkerMetrics {
        let state = self.state.read();
        let mut metrics = state.metrics.clone();
        metrics.uptime_pct = state.uptime_pct(Instant::now());
        metrics
    }

    /// Zero every counter and restart the uptime clock. A task still running
    /// stays visible in `current_task` but its outcome will not be recorded.
    pub fn reset(&self) {
        let mut state = self.state.write();
        let current_task = state.current_task;
        let generation = state.generation + 1;
        *state = MonitorState::fresh(WorkerStatus::Initializing);
        state.current_task = current_task;
        state.generation = generation;
    }
}

impl Default for WorkerMonitor {
    fn default() -> Self {
        Self::new()
    }
}
