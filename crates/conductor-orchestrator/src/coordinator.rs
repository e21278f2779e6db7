use crate::engine::Orchestrator;
use crate::workflow::{Workflow, WorkflowStatus, WorkflowStep};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult, ErrorCode, TaskError, TaskResult};
use conductor_events::{kinds, Event, EventPriority};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_SOURCE: &str = "workflow-coordinator";

/// Terminal outcome of [`WorkflowCoordinator::submit_workflow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    /// Id of the workflow that ran.
    pub workflow_id: Uuid,
    /// `completed` or `failed`.
    pub status: WorkflowStatus,
    /// Results of every step that completed, including on failure.
    pub results: BTreeMap<String, Value>,
    /// Why the workflow failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Step whose failure ended the run, if a step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
}

impl WorkflowOutcome {
    /// Whether every step completed.
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id,
            status: workflow.status,
            results: workflow.results.clone(),
            error: workflow.error.clone(),
            failed_step: workflow.failed_step.clone(),
        }
    }
}

/// Runs workflow DAGs in dependency-ordered batches.
///
/// Every step becomes one task submitted through the orchestrator; the
/// coordinator never talks to workers directly.
pub struct WorkflowCoordinator {
    orchestrator: Arc<Orchestrator>,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
}

impl WorkflowCoordinator {
    /// A coordinator dispatching through `orchestrator`.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Run `workflow` to a terminal state.
    ///
    /// Each round dispatches every step whose dependencies have completed,
    /// concurrently, and waits for the whole batch before computing the next.
    /// If steps remain but none are ready the run fails with
    /// `CIRCULAR_DEPENDENCY` without dispatching them.
    pub async fn submit_workflow(&self, mut workflow: Workflow) -> WorkflowOutcome {
        workflow.status = WorkflowStatus::Pending;
        workflow.results.clear();
        workflow.error = None;
        workflow.failed_step = None;
        let id = workflow.id;
        let steps = workflow.steps.clone();
        let validation = workflow.validate();
        self.workflows.write().insert(id, workflow);

        if let Err(err) = validation {
            warn!(workflow_id = %id, error = %err, "Workflow rejected");
            return self.fail(id, err, None);
        }

        let name = self.update(id, |wf| {
            wf.status = WorkflowStatus::Running;
            wf.started_at = Some(Utc::now());
            wf.name.clone()
        });
        info!(workflow_id = %id, name = ?name, steps = steps.len(), "Workflow started");
        self.emit(
            kinds::WORKFLOW_STARTED,
            id,
            json!({ "workflowId": id, "name": name, "steps": steps.len() }),
        );

        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut results: BTreeMap<String, Value> = BTreeMap::new();
        let mut pending: Vec<WorkflowStep> = steps;

        while !pending.is_empty() {
            if self.is_finished(id) {
                return self.outcome(id);
            }

            let (ready, blocked): (Vec<WorkflowStep>, Vec<WorkflowStep>) = pending
                .into_iter()
                .partition(|s| s.depends_on.iter().all(|d| completed.contains(d)));
            pending = blocked;

            if ready.is_empty() {
                let stalled: Vec<&str> = pending.iter().map(|s| s.step_id.as_str()).collect();
                let err = TaskError::new(
                    ErrorCode::CircularDependency,
                    format!("no runnable steps; remaining steps wait on each other: {stalled:?}"),
                )
                .with_details(json!({ "pendingSteps": stalled }));
                error!(workflow_id = %id, pending = ?stalled, "Circular dependency detected");
                return self.fail(id, err, None);
            }

            debug!(
                workflow_id = %id,
                batch = ?ready.iter().map(|s| s.step_id.as_str()).collect::<Vec<_>>(),
                "Dispatching ready steps"
            );
            let dispatches = ready.iter().map(|step| {
                let task = step.to_task(&results);
                async move { (step, self.orchestrator.distribute(task).await) }
            });
            let outcomes: Vec<(&WorkflowStep, TaskResult)> = join_all(dispatches).await;

            let mut failure: Option<(String, TaskError)> = None;
            let mut batch: Vec<(String, Value, Option<String>)> = Vec::new();
            for (step, result) in outcomes {
                if result.success {
                    batch.push((
                        step.step_id.clone(),
                        result.data.unwrap_or(Value::Null),
                        result.metrics.worker_id,
                    ));
                } else if failure.is_none() {
                    let err = result.error.unwrap_or_else(|| {
                        TaskError::new(ErrorCode::TaskExecutionError, "step failed without error")
                    });
                    failure = Some((step.step_id.clone(), err));
                }
            }

            // A cancellation that landed while the batch ran wins; its results
            // are not incorporated.
            let applied = self.update(id, |wf| {
                if wf.status.is_terminal() {
                    return false;
                }
                for (step_id, data, _) in &batch {
                    wf.results.insert(step_id.clone(), data.clone());
                }
                true
            });
            if applied != Some(true) {
                info!(workflow_id = %id, "Workflow cancelled; discarding batch results");
                return self.outcome(id);
            }

            for (step_id, data, worker_id) in batch {
                self.emit(
                    kinds::WORKFLOW_STEP_COMPLETED,
                    id,
                    json!({ "workflowId": id, "stepId": step_id, "workerId": worker_id }),
                );
                completed.insert(step_id.clone());
                results.insert(step_id, data);
            }

            if let Some((step_id, err)) = failure {
                error!(workflow_id = %id, step_id = %step_id, error = %err, "Workflow step failed");
                return self.fail(id, err, Some(step_id));
            }
        }

        self.update(id, |wf| {
            wf.status = WorkflowStatus::Completed;
            wf.completed_at = Some(Utc::now());
        });
        let outcome = self.outcome(id);
        info!(workflow_id = %id, steps = outcome.results.len(), "Workflow completed");
        self.emit(
            kinds::WORKFLOW_COMPLETED,
            id,
            json!({
                "workflowId": id,
                "steps": outcome.results.len(),
                "durationMs": self.get_workflow(id).and_then(|wf| wf.duration_ms()),
            }),
        );
        outcome
    }

    /// Mark a pending or running workflow failed with `WORKFLOW_CANCELLED`.
    /// Steps already dispatched finish, but nothing further is scheduled.
    /// Returns `false` if the workflow had already finished.
    pub fn cancel_workflow(&self, id: Uuid) -> ConductorResult<bool> {
        let cancelled = {
            let mut workflows = self.workflows.write();
            let wf = workflows
                .get_mut(&id)
                .ok_or_else(|| ConductorError::Workflow(format!("unknown workflow '{id}'")))?;
            if wf.status.is_terminal() {
                false
            } else {
                wf.status = WorkflowStatus::Failed;
                wf.error = Some(TaskError::new(
                    ErrorCode::WorkflowCancelled,
                    "workflow cancelled",
                ));
                wf.completed_at = Some(Utc::now());
                true
            }
        };
        if cancelled {
            info!(workflow_id = %id, "Workflow cancelled");
            self.emit(
                kinds::WORKFLOW_FAILED,
                id,
                json!({
                    "workflowId": id,
                    "error": TaskError::new(ErrorCode::WorkflowCancelled, "workflow cancelled"),
                }),
            );
        }
        Ok(cancelled)
    }

    /// Current state of a submitted workflow.
    pub fn get_workflow(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.read().get(&id).cloned()
    }

    /// Every known workflow, oldest first.
    pub fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.workflows.read().values().cloned().collect();
        workflows.sort_by_key(|wf| wf.created_at);
        workflows
    }

    fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Workflow) -> R) -> Option<R> {
        self.workflows.write().get_mut(&id).map(f)
    }

    fn is_finished(&self, id: Uuid) -> bool {
        self.workflows
            .read()
            .get(&id)
            .map_or(true, |wf| wf.status.is_terminal())
    }

    fn outcome(&self, id: Uuid) -> WorkflowOutcome {
        match self.workflows.read().get(&id) {
            Some(wf) => WorkflowOutcome::from_workflow(wf),
            None => WorkflowOutcome {
                workflow_id: id,
                status: WorkflowStatus::Failed,
                results: BTreeMap::new(),
                error: None,
                failed_step: None,
            },
        }
    }

    fn fail(&self, id: Uuid, err: TaskError, failed_step: Option<String>) -> WorkflowOutcome {
        let transitioned = self.update(id, |wf| {
            if wf.status.is_terminal() {
                return false;
            }
            wf.status = WorkflowStatus::Failed;
            wf.error = Some(err.clone());
            wf.failed_step = failed_step.clone();
            wf.completed_at = Some(Utc::now());
            true
        });
        if transitioned == Some(true) {
            self.emit(
                kinds::WORKFLOW_FAILED,
                id,
                json!({ "workflowId": id, "stepId": failed_step, "error": err }),
            );
        }
        self.outcome(id)
    }

    fn emit(&self, kind: &str, workflow_id: Uuid, payload: Value) {
        let mut event =
            Event::new(kind, EVENT_SOURCE, payload).with_correlation_id(workflow_id.to_string());
        if kind == kinds::WORKFLOW_FAILED {
            event = event.with_priority(EventPriority::High);
        }
        if let Err(e) = self.orchestrator.event_bus().publish(event) {
            warn!(kind, error = %e, "Failed to publish workflow event");
        }
    }
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("workflows", &self.workflows.read().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::OrchestratorConfig;
    use crate::engine::WorkerConfig;
    use async_trait::async_trait;
    use conductor_core::Task;
    use conductor_events::{EventBus, EventBusConfig, HistoryQuery};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Returns `{step, context}` and logs the task kinds it ran.
    struct StepAgent {
        kind: String,
        calls: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    impl StepAgent {
        fn new(kind: &str) -> Arc<Self> {
            Arc::new(Self {
                kind: kind.into(),
                calls: Mutex::new(Vec::new()),
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing(kind: &str) -> Arc<Self> {
            Arc::new(Self {
                kind: kind.into(),
                calls: Mutex::new(Vec::new()),
                fail: true,
                delay: Duration::ZERO,
            })
        }

        fn slow(kind: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                kind: kind.into(),
                calls: Mutex::new(Vec::new()),
                fail: false,
                delay,
            })
        }
    }

    #[async_trait]
    impl Agent for StepAgent {
        fn kind(&self) -> &str {
            &self.kind
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["run".into()]
        }

        async fn execute_task(&self, task: &Task) -> ConductorResult<Value> {
            self.calls.lock().push(task.kind.clone());
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ConductorError::Agent(format!("{} failed", self.kind)));
            }
            Ok(json!({ "by": self.kind, "context": task.payload["context"] }))
        }
    }

    async fn coordinator(agents: Vec<Arc<StepAgent>>) -> WorkflowCoordinator {
        let orch = Orchestrator::new(
            OrchestratorConfig {
                retry_backoff_ms: 1,
                ..OrchestratorConfig::default()
            },
            EventBus::new(EventBusConfig::default()),
        );
        for agent in agents {
            orch.register_worker(agent, WorkerConfig::new()).await.unwrap();
        }
        WorkflowCoordinator::new(Arc::new(orch))
    }

    #[tokio::test]
    async fn test_linear_workflow_passes_results_forward() {
        let coord = coordinator(vec![StepAgent::new("a"), StepAgent::new("b")]).await;
        let wf = Workflow::new(
            "linear",
            vec![
                WorkflowStep::new("first", "a", "run"),
                WorkflowStep::new("second", "b", "run").depends_on("first"),
            ],
        );
        let id = wf.id;

        let outcome = coord.submit_workflow(wf).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.results["second"]["context"]["first"]["by"], "a");

        let stored = coord.get_workflow(id).unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert!(stored.started_at.is_some() && stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cycle_fails_without_dispatch() {
        let agent = StepAgent::new("a");
        let coord = coordinator(vec![agent.clone()]).await;
        let wf = Workflow::new(
            "cycle",
            vec![
                WorkflowStep::new("s1", "a", "run").depends_on("s2"),
                WorkflowStep::new("s2", "a", "run").depends_on("s1"),
            ],
        );
        let outcome = coord.submit_workflow(wf).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.error.unwrap().code, ErrorCode::CircularDependency);
        assert!(agent.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_dependency_is_distinct_error() {
        let agent = StepAgent::new("a");
        let coord = coordinator(vec![agent.clone()]).await;
        let wf = Workflow::new(
            "dangling",
            vec![
                WorkflowStep::new("s1", "a", "run"),
                WorkflowStep::new("s2", "a", "run").depends_on("missing"),
            ],
        );
        let outcome = coord.submit_workflow(wf).await;
        assert_eq!(outcome.error.unwrap().code, ErrorCode::UnresolvedDependency);
        assert!(agent.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_preserves_earlier_results() {
        let bad = StepAgent::failing("b");
        let coord = coordinator(vec![StepAgent::new("a"), bad.clone()]).await;
        let wf = Workflow::new(
            "partial",
            vec![
                WorkflowStep::new("ok", "a", "run"),
                WorkflowStep::new("broken", "b", "run")
                    .depends_on("ok")
                    .with_retry_limit(2),
                WorkflowStep::new("never", "a", "run").depends_on("broken"),
            ],
        );
        let outcome = coord.submit_workflow(wf).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failed_step.as_deref(), Some("broken"));
        assert_eq!(outcome.error.unwrap().code, ErrorCode::TaskExecutionError);
        assert!(outcome.results.contains_key("ok"));
        assert!(!outcome.results.contains_key("never"));
        assert_eq!(bad.calls.lock().len(), 3, "one attempt plus two retries");
    }

    #[tokio::test]
    async fn test_step_timeout_counts_as_failure() {
        let coord = coordinator(vec![StepAgent::slow("a", Duration::from_millis(1_500))]).await;
        let wf = Workflow::new(
            "slow",
            vec![WorkflowStep::new("s1", "a", "run").with_timeout_sec(1)],
        );
        let outcome = coord.submit_workflow(wf).await;
        assert_eq!(outcome.error.unwrap().code, ErrorCode::TaskTimeout);
    }

    #[tokio::test]
    async fn test_missing_worker_kind_fails_workflow() {
        let coord = coordinator(vec![StepAgent::new("a")]).await;
        let wf = Workflow::new("orphan", vec![WorkflowStep::new("s1", "nobody", "run")]);
        let outcome = coord.submit_workflow(wf).await;
        assert_eq!(outcome.error.unwrap().code, ErrorCode::TaskDistributionError);
    }

    #[tokio::test]
    async fn test_cancel_while_running_discards_batch() {
        let coord = Arc::new(
            coordinator(vec![
                StepAgent::slow("a", Duration::from_millis(100)),
                StepAgent::new("b"),
            ])
            .await,
        );
        let wf = Workflow::new(
            "cancel-me",
            vec![
                WorkflowStep::new("s1", "a", "run"),
                WorkflowStep::new("s2", "b", "run").depends_on("s1"),
            ],
        );
        let id = wf.id;

        let runner = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.submit_workflow(wf).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coord.cancel_workflow(id).unwrap());
        assert!(!coord.cancel_workflow(id).unwrap(), "already terminal");

        let outcome = runner.await.unwrap();
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.error.unwrap().code, ErrorCode::WorkflowCancelled);
        assert!(outcome.results.is_empty());
        assert!(coord.cancel_workflow(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_events_and_listing() {
        let coord = coordinator(vec![StepAgent::new("a")]).await;
        let first = Workflow::new("one", vec![WorkflowStep::new("s1", "a", "run")]);
        let second = Workflow::new("two", vec![WorkflowStep::new("s1", "a", "run")]);
        let first_id = first.id;
        coord.submit_workflow(first).await;
        coord.submit_workflow(second).await;

        let names: Vec<String> = coord.list_workflows().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["one", "two"]);

        let bus = coord.orchestrator.event_bus();
        let events = bus.history(&HistoryQuery::new().correlation_id(first_id.to_string()));
        let kinds_seen: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds_seen,
            vec![
                kinds::WORKFLOW_STARTED,
                kinds::WORKFLOW_STEP_COMPLETED,
                kinds::WORKFLOW_COMPLETED
            ]
        );
    }
}
