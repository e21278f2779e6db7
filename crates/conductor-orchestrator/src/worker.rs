use crate::agent::Agent;
use crate::monitor::WorkerMonitor;
use crate::task_queue::{QueuedTask, TaskQueue};
use crate::types::{WorkerHealth, WorkerMetrics, WorkerSnapshot, WorkerStatus};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult, ErrorCode, Task, TaskResult};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Executes tasks for one agent, one at a time, from its own priority queue.
pub struct WorkerRuntime {
    id: String,
    kind: String,
    capabilities: BTreeSet<String>,
    agent: Arc<dyn Agent>,
    queue: Mutex<TaskQueue>,
    monitor: WorkerMonitor,
    accepting: AtomicBool,
    stopped: AtomicBool,
    wake: Notify,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRuntime {
    /// A stopped runtime for `agent`; call [`WorkerRuntime::start`].
    pub fn new(id: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            id: id.into(),
            kind: agent.kind().to_string(),
            capabilities: agent.capabilities().into_iter().collect(),
            agent,
            queue: Mutex::new(TaskQueue::new()),
            monitor: WorkerMonitor::new(),
            accepting: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Registry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agent kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Task kinds the agent handles.
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Whether this worker's capability set (and kind, when pinned) admits `task`.
    pub fn accepts(&self, task: &Task) -> bool {
        self.capabilities.contains(&task.kind)
            && task.worker_kind.as_ref().map_or(true, |k| k == &self.kind)
    }

    /// Initialize the agent and spawn the processing loop.
    pub async fn start(self: &Arc<Self>) -> ConductorResult<()> {
        self.monitor.set_status(WorkerStatus::Initializing);
        if let Err(e) = self.agent.initialize().await {
            self.monitor.set_status(WorkerStatus::Error);
            self.monitor.record_error(e.to_string());
            error!(worker_id = %self.id, error = %e, "Worker initialization failed");
            return Err(e);
        }
        self.monitor.set_status(WorkerStatus::Idle);
        self.stopped.store(false, Ordering::SeqCst);
        self.accepting.store(true, Ordering::SeqCst);

        let runtime = Arc::clone(self);
        *self.loop_handle.lock() = Some(tokio::spawn(async move { runtime.run_loop().await }));
        info!(worker_id = %self.id, kind = %self.kind, "Worker started");
        Ok(())
    }

    /// Enqueue a task; the returned receiver yields its terminal result.
    /// Never blocks on a running task.
    pub fn submit(&self, task: Task) -> ConductorResult<oneshot::Receiver<TaskResult>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ConductorError::Worker(format!(
                "worker '{}' is not accepting tasks",
                self.id
            )));
        }
        debug!(worker_id = %self.id, task_id = %task.id, priority = %task.priority, "Task queued");
        let rx = self.queue.lock().push(task);
        self.wake.notify_one();
        Ok(rx)
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().pop_next();
            match next {
                Some(entry) => {
                    self.monitor.set_availability(true);
                    self.process(entry).await;
                }
                None => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    self.monitor.set_availability(false);
                    self.wake.notified().await;
                }
            }
        }
        debug!(worker_id = %self.id, "Worker loop exited");
    }

    async fn process(&self, entry: QueuedTask) {
        let task_id = entry.task.id;

        if entry.task.is_expired() {
            info!(worker_id = %self.id, task_id = %task_id, "Skipping expired task");
            entry.respond(
                TaskResult::failure(ErrorCode::TaskExpired, "task expired before execution", 0)
                    .with_worker(&self.id),
            );
            return;
        }

        if !self.agent.validate_task(&entry.task) {
            let message = format!(
                "worker '{}' cannot handle task kind '{}'",
                self.id, entry.task.kind
            );
            warn!(worker_id = %self.id, task_id = %task_id, "Task rejected by validation");
            self.monitor.record_rejection(message.clone());
            entry.respond(
                TaskResult::failure(ErrorCode::TaskValidationError, message, 0)
                    .with_worker(&self.id),
            );
            return;
        }

        let generation = self.monitor.start_task(task_id);
        let start = Instant::now();

        // Run on its own task so a panicking agent cannot take the loop down.
        let agent = Arc::clone(&self.agent);
        let task = entry.task.clone();
        let outcome = tokio::spawn(async move { agent.execute_task(&task).await }).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(data)) => TaskResult::success(data, elapsed_ms),
            Ok(Err(e)) => TaskResult::failure(ErrorCode::TaskExecutionError, e.to_string(), elapsed_ms),
            Err(join_err) => TaskResult::failure(
                ErrorCode::TaskExecutionError,
                format!("agent panicked: {join_err}"),
                elapsed_ms,
            ),
        };

        match &result.error {
            None => debug!(worker_id = %self.id, task_id = %task_id, elapsed_ms, "Task completed"),
            Some(err) => {
                error!(worker_id = %self.id, task_id = %task_id, error = %err, "Task execution failed");
            }
        }
        let error = result.error.as_ref().map(|e| e.message.clone());
        if !self.monitor.finish_task(generation, elapsed_ms, error) {
            debug!(worker_id = %self.id, task_id = %task_id, "Worker was reset mid-task; outcome not recorded");
        }
        entry.respond(result.with_worker(&self.id));
    }

    /// Effective status, `processing` while a task runs.
    pub fn status(&self) -> WorkerStatus {
        self.monitor.status()
    }

    /// Lifecycle status, ignoring whether a task is currently running.
    pub fn lifecycle_status(&self) -> WorkerStatus {
        self.monitor.base_status()
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> WorkerMetrics {
        self.monitor.metrics()
    }

    /// Tasks waiting behind the running one.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Status, metrics and queue length at once.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            kind: self.kind.clone(),
            capabilities: self.capabilities.clone(),
            status: self.monitor.status(),
            metrics: self.monitor.metrics(),
            queue_length: self.queue_len(),
            current_task: self.monitor.current_task(),
        }
    }

    /// Current status and metrics plus the agent's own report.
    pub async fn health_check(&self) -> WorkerHealth {
        let agent = self.agent.health_check().await;
        let snapshot = self.snapshot();
        WorkerHealth {
            worker_id: snapshot.id,
            status: snapshot.status,
            agent_healthy: agent.healthy,
            agent_status: agent.status,
            metrics: snapshot.metrics,
            queue_length: snapshot.queue_length,
            checked_at: Utc::now(),
        }
    }

    /// Take the worker out of (or back into) load-balancer rotation. Queued
    /// tasks keep running either way.
    pub fn set_maintenance(&self, enabled: bool) {
        let current = self.monitor.base_status();
        if enabled && current.is_selectable() {
            self.monitor.set_status(WorkerStatus::Maintenance);
        } else if !enabled && current == WorkerStatus::Maintenance {
            self.monitor.set_status(WorkerStatus::Idle);
        }
    }

    fn fail_queued(&self, message: &str) -> usize {
        let drained = self.queue.lock().drain_all();
        let count = drained.len();
        for entry in drained {
            entry.respond(
                TaskResult::failure(ErrorCode::WorkerUnavailable, message, 0).with_worker(&self.id),
            );
        }
        count
    }

    /// Clear the queue, reset metrics and re-initialize the agent.
    pub async fn reset(&self) -> ConductorResult<()> {
        let cleared = self.fail_queued("worker restarted");
        self.monitor.reset();
        warn!(worker_id = %self.id, cleared, "Restarting worker");

        match self.agent.initialize().await {
            Ok(()) => {
                self.monitor.set_status(WorkerStatus::Idle);
                info!(worker_id = %self.id, "Worker restarted");
                Ok(())
            }
            Err(e) => {
                self.monitor.set_status(WorkerStatus::Error);
                self.monitor.record_error(e.to_string());
                error!(worker_id = %self.id, error = %e, "Worker re-initialization failed");
                Err(e)
            }
        }
    }

    /// Stop accepting tasks, wait up to `timeout` for the queue to drain, then
    /// fail whatever is left and stop.
    pub async fn shutdown(&self, timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;

        while (self.queue_len() > 0 || self.monitor.is_processing()) && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let abandoned = self.fail_queued("worker shut down");
        if abandoned > 0 {
            warn!(worker_id = %self.id, abandoned, "Shutdown timeout reached, clearing queue");
        }

        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if self.monitor.is_processing() {
                // The in-flight task keeps running detached; its caller sees the
                // result channel close.
                handle.abort();
            } else if let Err(e) = handle.await {
                warn!(worker_id = %self.id, error = %e, "Worker loop ended abnormally");
            }
        }

        self.monitor.set_status(WorkerStatus::Shutdown);
        self.agent.shutdown().await;
        info!(worker_id = %self.id, "Worker shut down");
    }
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.monitor.status())
            .finish()
    }
}
