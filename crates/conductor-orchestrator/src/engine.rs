use crate::agent::Agent;
use crate::balancer::{self, LoadBalancingStrategy};
use crate::config::OrchestratorConfig;
use crate::types::{
    HealthReport, HealthStatus, SystemHealth, SystemMetrics, WorkerMetrics, WorkerRegistration,
    WorkerStatus,
};
use crate::worker::WorkerRuntime;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, ErrorCode, Task, TaskResult};
use conductor_events::{kinds, Event, EventBus, EventPriority};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_SOURCE: &str = "orchestrator";

/// Options for [`Orchestrator::register_worker`].
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Registry id; defaults to `<kind>-<random suffix>`.
    pub id: Option<String>,
    /// Ids of already-registered workers this one depends on.
    pub dependencies: Vec<String>,
}

impl WorkerConfig {
    /// Generated id, no dependencies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed registry id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Declare a dependency on an already-registered worker.
    pub fn with_dependency(mut self, worker_id: impl Into<String>) -> Self {
        self.dependencies.push(worker_id.into());
        self
    }
}

struct WorkerEntry {
    runtime: Arc<WorkerRuntime>,
    dependencies: BTreeSet<String>,
    registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct DistributionStats {
    total: u64,
    completed: u64,
    failed: u64,
    retries: u64,
    timeouts: u64,
    distribution_errors: u64,
    total_processing_ms: u64,
    active: usize,
}

/// Owns the worker registry and routes every task onto a worker.
///
/// All registry access goes through this type. Distribution only reads the
/// registry; registration, unregistration and health sweeps are the only
/// writers.
pub struct Orchestrator {
    config: OrchestratorConfig,
    workers: RwLock<BTreeMap<String, WorkerEntry>>,
    strategy: RwLock<LoadBalancingStrategy>,
    /// Successful selections so far; drives round-robin.
    distributed: AtomicU64,
    concurrency: Semaphore,
    stats: Mutex<DistributionStats>,
    /// Outcome of the last health check per worker id.
    health: RwLock<HashMap<String, bool>>,
    bus: EventBus,
    started_at: Instant,
    health_stop: Arc<Notify>,
    health_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// An empty registry. Call [`Orchestrator::start`] for periodic health checks.
    pub fn new(config: OrchestratorConfig, bus: EventBus) -> Self {
        Self {
            strategy: RwLock::new(config.load_balancing_strategy),
            concurrency: Semaphore::new(config.max_concurrent_tasks),
            config,
            workers: RwLock::new(BTreeMap::new()),
            distributed: AtomicU64::new(0),
            stats: Mutex::new(DistributionStats::default()),
            health: RwLock::new(HashMap::new()),
            bus,
            started_at: Instant::now(),
            health_stop: Arc::new(Notify::new()),
            health_handle: Mutex::new(None),
        }
    }

    /// Configuration the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Bus that lifecycle and task events are published on.
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register an agent and start its worker runtime. Returns the worker id.
    pub async fn register_worker(
        &self,
        agent: Arc<dyn Agent>,
        config: WorkerConfig,
    ) -> ConductorResult<String> {
        let id = config.id.unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", agent.kind(), &suffix[..8])
        });
        let dependencies: BTreeSet<String> = config.dependencies.into_iter().collect();
        self.check_registrable(&id, &dependencies)?;

        let runtime = Arc::new(WorkerRuntime::new(id.clone(), agent));
        runtime.start().await?;

        let inserted = {
            let mut workers = self.workers.write();
            if workers.contains_key(&id) {
                false
            } else {
                workers.insert(
                    id.clone(),
                    WorkerEntry {
                        runtime: Arc::clone(&runtime),
                        dependencies: dependencies.clone(),
                        registered_at: Utc::now(),
                    },
                );
                true
            }
        };
        if !inserted {
            // Lost a race with a concurrent registration of the same id.
            runtime.shutdown(Duration::ZERO).await;
            return Err(ConductorError::Orchestrator(format!(
                "worker '{id}' is already registered"
            )));
        }

        info!(worker_id = %id, kind = %runtime.kind(), "Worker registered");
        self.emit(
            kinds::WORKER_REGISTERED,
            json!({
                "workerId": id,
                "kind": runtime.kind(),
                "capabilities": runtime.capabilities(),
                "dependencies": dependencies,
            }),
            None,
        );
        Ok(id)
    }

    fn check_registrable(&self, id: &str, dependencies: &BTreeSet<String>) -> ConductorResult<()> {
        let workers = self.workers.read();
        if workers.contains_key(id) {
            return Err(ConductorError::Orchestrator(format!(
                "worker '{id}' is already registered"
            )));
        }
        if let Some(missing) = dependencies.iter().find(|d| !workers.contains_key(*d)) {
            return Err(ConductorError::Orchestrator(format!(
                "worker '{id}' depends on unknown worker '{missing}'"
            )));
        }
        Ok(())
    }

    /// Remove a worker and shut its runtime down. Returns `false` if no such
    /// worker was registered.
    pub async fn unregister_worker(&self, id: &str) -> ConductorResult<bool> {
        let entry = {
            let mut workers = self.workers.write();
            if let Some(dependent) = workers
                .iter()
                .find(|(other, e)| other.as_str() != id && e.dependencies.contains(id))
                .map(|(other, _)| other.clone())
            {
                return Err(ConductorError::Orchestrator(format!(
                    "worker '{id}' is a dependency of '{dependent}'"
                )));
            }
            workers.remove(id)
        };
        let Some(entry) = entry else {
            return Ok(false);
        };
        self.health.write().remove(id);

        entry
            .runtime
            .shutdown(Duration::from_millis(self.config.shutdown_timeout_ms))
            .await;
        info!(worker_id = %id, "Worker unregistered");
        self.emit(kinds::WORKER_UNREGISTERED, json!({ "workerId": id }), None);
        Ok(true)
    }

    /// Switch the selection strategy; in-flight tasks are unaffected.
    pub fn set_load_balancing_strategy(&self, strategy: LoadBalancingStrategy) {
        *self.strategy.write() = strategy;
        info!(strategy = %strategy, "Load balancing strategy changed");
    }

    /// Strategy currently in use.
    pub fn load_balancing_strategy(&self) -> LoadBalancingStrategy {
        *self.strategy.read()
    }

    /// Registry entry for `id`.
    pub fn worker(&self, id: &str) -> Option<WorkerRegistration> {
        let workers = self.workers.read();
        let health = self.health.read();
        workers.get(id).map(|entry| registration(entry, &health))
    }

    /// Registry snapshot ordered by worker id.
    pub fn workers(&self) -> Vec<WorkerRegistration> {
        let workers = self.workers.read();
        let health = self.health.read();
        workers.values().map(|e| registration(e, &health)).collect()
    }

    fn runtime(&self, id: &str) -> ConductorResult<Arc<WorkerRuntime>> {
        self.workers
            .read()
            .get(id)
            .map(|e| Arc::clone(&e.runtime))
            .ok_or_else(|| ConductorError::Orchestrator(format!("unknown worker '{id}'")))
    }

    /// Take a worker out of rotation, or put it back.
    pub fn set_worker_maintenance(&self, id: &str, enabled: bool) -> ConductorResult<()> {
        self.runtime(id)?.set_maintenance(enabled);
        info!(worker_id = %id, enabled, "Worker maintenance mode changed");
        Ok(())
    }

    /// Clear the worker's queue, reset its metrics and re-initialize its agent.
    pub async fn restart_worker(&self, id: &str) -> ConductorResult<()> {
        let runtime = self.runtime(id)?;
        runtime.reset().await?;
        self.health.write().insert(id.to_string(), true);
        self.emit(kinds::WORKER_RESTARTED, json!({ "workerId": id }), None);
        Ok(())
    }

    /// Route `task` onto a worker and wait for its terminal result.
    ///
    /// Failures are returned as unsuccessful results. Retryable failures are
    /// re-attempted with the same task id and an incremented retry count, up
    /// to the task's own limit or the configured one.
    pub async fn distribute(&self, task: Task) -> TaskResult {
        let Ok(_permit) = self.concurrency.acquire().await else {
            return TaskResult::failure(
                ErrorCode::WorkerUnavailable,
                "orchestrator is shut down",
                0,
            );
        };
        {
            let mut stats = self.stats.lock();
            stats.total += 1;
            stats.active += 1;
        }

        let max_retries = task.max_retries.unwrap_or(if self.config.auto_retry {
            self.config.max_retry_attempts
        } else {
            0
        });
        let timeout_ms = task.timeout_ms.unwrap_or(self.config.task_timeout_ms);

        let mut current = task;
        let mut attempts = 0u32;
        let mut result = loop {
            attempts += 1;
            let result = self.attempt(&current, timeout_ms).await;
            if result.success || !result.is_retryable() || current.retry_count >= max_retries {
                break result;
            }
            let delay_ms = self.config.retry_delay_ms(current.retry_count);
            warn!(
                task_id = %current.id,
                retry = current.retry_count + 1,
                max_retries,
                delay_ms,
                error = ?result.error,
                "Retrying task"
            );
            self.stats.lock().retries += 1;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            current = current.next_attempt();
        };
        result.metrics.attempts = attempts;

        {
            let mut stats = self.stats.lock();
            stats.active -= 1;
            stats.total_processing_ms += result.metrics.processing_time_ms;
            if result.success {
                stats.completed += 1;
            } else {
                stats.failed += 1;
            }
        }

        let correlation = current.id.to_string();
        if result.success {
            debug!(task_id = %current.id, attempts, "Task completed");
            self.emit(
                kinds::TASK_COMPLETED,
                json!({
                    "taskId": current.id,
                    "kind": current.kind,
                    "workerId": result.metrics.worker_id,
                    "processingTimeMs": result.metrics.processing_time_ms,
                    "attempts": attempts,
                }),
                Some(correlation),
            );
        } else {
            let error = result.error.as_ref();
            error!(
                task_id = %current.id,
                attempts,
                code = ?error.map(|e| e.code),
                "Task failed"
            );
            self.emit(
                kinds::TASK_FAILED,
                json!({
                    "taskId": current.id,
                    "kind": current.kind,
                    "workerId": result.metrics.worker_id,
                    "error": error,
                    "attempts": attempts,
                }),
                Some(correlation),
            );
        }
        result
    }

    async fn attempt(&self, task: &Task, timeout_ms: u64) -> TaskResult {
        let Some(worker) = self.select_worker(task) else {
            self.stats.lock().distribution_errors += 1;
            warn!(task_id = %task.id, kind = %task.kind, "No eligible worker");
            return TaskResult::failure(
                ErrorCode::TaskDistributionError,
                format!("no eligible worker for task kind '{}'", task.kind),
                0,
            );
        };
        debug!(task_id = %task.id, worker_id = %worker.id(), retry = task.retry_count, "Dispatching task");

        let start = Instant::now();
        let rx = match worker.submit(task.clone()) {
            Ok(rx) => rx,
            Err(e) => {
                return TaskResult::failure(ErrorCode::WorkerUnavailable, e.to_string(), 0)
                    .with_worker(worker.id())
            }
        };

        // The worker keeps running the task after a timeout; only the wait ends.
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => TaskResult::failure(
                ErrorCode::WorkerUnavailable,
                format!("worker '{}' dropped the task", worker.id()),
                start.elapsed().as_millis() as u64,
            )
            .with_worker(worker.id()),
            Err(_) => {
                self.stats.lock().timeouts += 1;
                warn!(task_id = %task.id, worker_id = %worker.id(), timeout_ms, "Task timed out");
                TaskResult::failure(
                    ErrorCode::TaskTimeout,
                    format!("task timed out after {timeout_ms}ms"),
                    start.elapsed().as_millis() as u64,
                )
                .with_worker(worker.id())
            }
        }
    }

    /// Eligible workers are active or idle by lifecycle, accept the task and
    /// did not fail their last health check. A worker busy with another task
    /// stays eligible; the task waits in its queue.
    fn select_worker(&self, task: &Task) -> Option<Arc<WorkerRuntime>> {
        let workers = self.workers.read();
        let health = self.health.read();
        let eligible: Vec<&Arc<WorkerRuntime>> = workers
            .values()
            .map(|e| &e.runtime)
            .filter(|w| {
                w.lifecycle_status().is_selectable()
                    && w.accepts(task)
                    && health.get(w.id()).copied().unwrap_or(true)
            })
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let metrics: Vec<WorkerMetrics> = eligible.iter().map(|w| w.metrics()).collect();
        let candidates: Vec<&WorkerMetrics> = metrics.iter().collect();
        let strategy = *self.strategy.read();
        let distributed = self.distributed.fetch_add(1, Ordering::SeqCst);
        let index = balancer::select(strategy, &candidates, distributed)?;
        eligible.get(index).map(|&w| Arc::clone(w))
    }

    /// Ping every worker once. Unhealthy workers are reset when auto-restart
    /// is enabled and excluded from selection otherwise.
    pub async fn run_health_checks(&self) -> HealthReport {
        let runtimes: Vec<Arc<WorkerRuntime>> = self
            .workers
            .read()
            .values()
            .map(|e| Arc::clone(&e.runtime))
            .filter(|w| {
                !matches!(
                    w.status(),
                    WorkerStatus::Maintenance | WorkerStatus::Shutdown
                )
            })
            .collect();

        let timeout = Duration::from_millis(self.config.health_check_timeout_ms);
        let checks = runtimes.iter().map(|w| async move {
            let outcome = tokio::time::timeout(timeout, w.health_check()).await;
            (w, outcome)
        });
        let outcomes = join_all(checks).await;

        let mut report = HealthReport::default();
        for (worker, outcome) in outcomes {
            report.checked += 1;
            let healthy = match outcome {
                Ok(health) => health.is_healthy(
                    self.config.max_error_rate,
                    self.config.min_requests_for_error_rate,
                ),
                Err(_) => {
                    warn!(worker_id = %worker.id(), "Health check timed out");
                    false
                }
            };
            self.health.write().insert(worker.id().to_string(), healthy);
            if healthy {
                report.healthy += 1;
                continue;
            }

            warn!(worker_id = %worker.id(), status = %worker.status(), "Worker unhealthy");
            report.unhealthy.push(worker.id().to_string());
            if !self.config.auto_restart {
                continue;
            }
            match worker.reset().await {
                Ok(()) => {
                    self.health.write().insert(worker.id().to_string(), true);
                    report.restarted.push(worker.id().to_string());
                    self.emit(
                        kinds::WORKER_RESTARTED,
                        json!({ "workerId": worker.id(), "reason": "health-check" }),
                        None,
                    );
                }
                Err(e) => {
                    error!(worker_id = %worker.id(), error = %e, "Automatic restart failed");
                }
            }
        }

        info!(
            checked = report.checked,
            healthy = report.healthy,
            restarted = report.restarted.len(),
            "Health check completed"
        );
        self.emit(
            kinds::HEALTH_CHECK_COMPLETED,
            serde_json::to_value(&report).unwrap_or_default(),
            None,
        );
        report
    }

    /// Spawn the periodic health-check loop. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.health_handle.lock();
        if handle.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let stop = Arc::clone(&self.health_stop);
        let interval = Duration::from_millis(self.config.health_check_interval_ms);

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(orchestrator) = weak.upgrade() else { break };
                        orchestrator.run_health_checks().await;
                    }
                    _ = stop.notified() => break,
                }
            }
            debug!("Health check loop stopped");
        }));
        info!(interval_ms = self.config.health_check_interval_ms, "Orchestrator started");
    }

    /// Classify the pool: healthy when every worker is available,
    /// degraded when some are, unhealthy when none are.
    pub fn get_system_health(&self) -> SystemHealth {
        let workers = self.workers();
        let available = workers
            .iter()
            .filter(|w| {
                matches!(
                    w.status,
                    WorkerStatus::Active | WorkerStatus::Idle | WorkerStatus::Processing
                ) && w.healthy != Some(false)
            })
            .count();
        let status = if workers.is_empty() || available == 0 {
            HealthStatus::Unhealthy
        } else if available == workers.len() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        SystemHealth {
            status,
            total_workers: workers.len(),
            available_workers: available,
            workers,
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            checked_at: Utc::now(),
        }
    }

    /// Distribution counters and queue totals.
    pub fn get_metrics(&self) -> SystemMetrics {
        let (workers, queued_tasks) = {
            let workers = self.workers.read();
            let queued: usize = workers.values().map(|e| e.runtime.queue_len()).sum();
            (workers.len(), queued)
        };
        let stats = self.stats.lock();
        let finished = stats.completed + stats.failed;
        SystemMetrics {
            total_tasks: stats.total,
            completed_tasks: stats.completed,
            failed_tasks: stats.failed,
            retries: stats.retries,
            timeouts: stats.timeouts,
            distribution_errors: stats.distribution_errors,
            avg_processing_time_ms: if finished == 0 {
                0.0
            } else {
                stats.total_processing_ms as f64 / finished as f64
            },
            active_tasks: stats.active,
            queued_tasks,
            workers,
        }
    }

    /// Stop the health loop, refuse new tasks and shut every worker down
    /// within the configured timeout.
    pub async fn shutdown(&self) {
        self.health_stop.notify_one();
        let handle = self.health_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Health check loop ended abnormally");
            }
        }
        self.concurrency.close();

        let entries: Vec<WorkerEntry> = {
            let mut workers = self.workers.write();
            std::mem::take(&mut *workers).into_values().collect()
        };
        self.health.write().clear();

        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        join_all(entries.iter().map(|e| e.runtime.shutdown(timeout))).await;
        info!(workers = entries.len(), "Orchestrator shut down");
    }

    fn emit(&self, kind: &str, payload: serde_json::Value, correlation_id: Option<String>) {
        let mut event = Event::new(kind, EVENT_SOURCE, payload);
        if kind == kinds::TASK_FAILED {
            event = event.with_priority(EventPriority::High);
        }
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Err(e) = self.bus.publish(event) {
            warn!(kind, error = %e, "Failed to publish orchestrator event");
        }
    }
}

fn registration(entry: &WorkerEntry, health: &HashMap<String, bool>) -> WorkerRegistration {
    let snapshot = entry.runtime.snapshot();
    WorkerRegistration {
        healthy: health.get(&snapshot.id).copied(),
        id: snapshot.id,
        kind: snapshot.kind,
        capabilities: snapshot.capabilities,
        status: snapshot.status,
        metrics: snapshot.metrics,
        dependencies: entry.dependencies.clone(),
        queue_length: snapshot.queue_length,
        registered_at: entry.registered_at,
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.workers.read().len())
            .field("strategy", &self.load_balancing_strategy())
            .finish()
    }
}
