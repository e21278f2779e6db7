use chrono::{DateTime, Utc};
use conductor_core::{ErrorCode, Task, TaskError, TaskPriority};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Workflow lifecycle: `pending -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Submitted, not yet validated.
    Pending,
    /// Steps are being dispatched.
    Running,
    /// Every step succeeded.
    Completed,
    /// A step failed, validation failed or the run was cancelled.
    Failed,
}

impl WorkflowStatus {
    /// Terminal states are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One node of a workflow DAG, bound to a worker kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Unique within the workflow.
    pub step_id: String,
    /// Kind of worker that must run the step.
    pub worker_kind: String,
    /// Task kind handed to that worker.
    pub task_kind: String,
    /// Steps that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Step input; receives a `context` entry at dispatch.
    #[serde(default)]
    pub payload: Value,
    /// Per-attempt timeout; the orchestrator default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
    /// Retries allowed before the step, and with it the workflow, fails.
    #[serde(default)]
    pub retry_limit: u32,
    /// Queue priority of the step's task.
    #[serde(default)]
    pub priority: TaskPriority,
}

impl WorkflowStep {
    /// A step with an empty payload and no dependencies.
    pub fn new(
        step_id: impl Into<String>,
        worker_kind: impl Into<String>,
        task_kind: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            worker_kind: worker_kind.into(),
            task_kind: task_kind.into(),
            depends_on: Vec::new(),
            payload: json!({}),
            timeout_sec: None,
            retry_limit: 0,
            priority: TaskPriority::default(),
        }
    }

    /// Wait for `step_id` before running.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Set the step input.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Per-attempt timeout in seconds.
    pub fn with_timeout_sec(mut self, timeout_sec: u64) -> Self {
        self.timeout_sec = Some(timeout_sec);
        self
    }

    /// Allow `retry_limit` retries.
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Queue priority of the step's task.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Build the task for this step. The payload gains a `context` field
    /// holding every result completed so far; a non-object payload is moved
    /// under `input`.
    pub fn to_task(&self, context: &BTreeMap<String, Value>) -> Task {
        let context = Value::Object(context.clone().into_iter().collect());
        let payload = match &self.payload {
            Value::Object(map) => {
                let mut map = map.clone();
                map.insert("context".into(), context);
                Value::Object(map)
            }
            Value::Null => json!({ "context": context }),
            other => json!({ "input": other, "context": context }),
        };

        let mut task = Task::new(&self.task_kind, payload)
            .with_priority(self.priority)
            .with_worker_kind(&self.worker_kind)
            .with_max_retries(self.retry_limit);
        if let Some(secs) = self.timeout_sec {
            task = task.with_timeout_ms(secs.saturating_mul(1_000));
        }
        task
    }
}

/// A declarative multi-step workflow and its run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Assigned on creation.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// The DAG, in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// Lifecycle state.
    pub status: WorkflowStatus,
    /// Append-only while running, keyed by step id.
    pub results: BTreeMap<String, Value>,
    /// Why the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// The step whose failure ended the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Creation time; orders `list_workflows`.
    pub created_at: DateTime<Utc>,
    /// When dispatching began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// A pending workflow with a fresh id.
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps,
            status: WorkflowStatus::Pending,
            results: BTreeMap::new(),
            error: None,
            failed_step: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Structural checks that do not need execution: unique step ids and
    /// dependencies that name declared steps. Cycles surface while running.
    pub fn validate(&self) -> Result<(), TaskError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(TaskError::new(
                    ErrorCode::TaskValidationError,
                    format!("duplicate step id '{}'", step.step_id),
                )
                .with_details(json!({ "stepId": step.step_id })));
            }
        }
        for step in &self.steps {
            if let Some(missing) = step.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(TaskError::new(
                    ErrorCode::UnresolvedDependency,
                    format!("step '{}' depends on undeclared step '{missing}'", step.step_id),
                )
                .with_details(json!({ "stepId": step.step_id, "dependency": missing })));
            }
        }
        Ok(())
    }

    /// Run time, once the workflow has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
    }

    #[test]
    fn test_validate_accepts_dag() {
        let wf = Workflow::new(
            "fan-in",
            vec![
                WorkflowStep::new("s1", "a", "t"),
                WorkflowStep::new("s2", "a", "t"),
                WorkflowStep::new("s3", "a", "t").depends_on("s1").depends_on("s2"),
            ],
        );
        assert!(wf.validate().is_ok());
        assert_eq!(wf.status, WorkflowStatus::Pending);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let wf = Workflow::new(
            "dup",
            vec![WorkflowStep::new("s1", "a", "t"), WorkflowStep::new("s1", "a", "t")],
        );
        assert_eq!(wf.validate().unwrap_err().code, ErrorCode::TaskValidationError);
    }

    #[test]
    fn test_validate_rejects_undeclared_dependency() {
        let wf = Workflow::new(
            "dangling",
            vec![WorkflowStep::new("s1", "a", "t").depends_on("ghost")],
        );
        let err = wf.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvedDependency);
        assert_eq!(err.details.unwrap()["dependency"], "ghost");
    }

    #[test]
    fn test_cycle_passes_structural_validation() {
        let wf = Workflow::new(
            "cycle",
            vec![
                WorkflowStep::new("s1", "a", "t").depends_on("s2"),
                WorkflowStep::new("s2", "a", "t").depends_on("s1"),
            ],
        );
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_to_task_merges_context() {
        let step = WorkflowStep::new("s3", "writer", "summarize")
            .with_payload(json!({"style": "brief"}))
            .with_timeout_sec(2)
            .with_retry_limit(1)
            .with_priority(TaskPriority::High);
        let mut context = BTreeMap::new();
        context.insert("s1".to_string(), json!({"x": 1}));

        let task = step.to_task(&context);
        assert_eq!(task.kind, "summarize");
        assert_eq!(task.worker_kind.as_deref(), Some("writer"));
        assert_eq!(task.timeout_ms, Some(2_000));
        assert_eq!(task.max_retries, Some(1));
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.payload["style"], "brief");
        assert_eq!(task.payload["context"]["s1"]["x"], 1);
    }

    #[test]
    fn test_to_task_wraps_scalar_payload() {
        let step = WorkflowStep::new("s1", "a", "t").with_payload(json!("raw"));
        let task = step.to_task(&BTreeMap::new());
        assert_eq!(task.payload["input"], "raw");
        assert!(task.payload["context"].as_object().unwrap().is_empty());
    }
}
