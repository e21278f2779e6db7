use serde::{Deserialize, Serialize};

/// Error taxonomy for task-level and workflow-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Rejected by the worker before execution began.
    TaskValidationError,
    /// Raised inside agent logic.
    TaskExecutionError,
    /// The execution race against the timeout was lost.
    TaskTimeout,
    /// No eligible worker for the task.
    TaskDistributionError,
    /// Dropped at dequeue because `expires_at` had passed.
    TaskExpired,
    /// The worker was shut down or restarted while the task was queued.
    WorkerUnavailable,
    /// Workflow steps form a cycle.
    CircularDependency,
    /// A workflow step depends on a step id that was never declared.
    UnresolvedDependency,
    /// The workflow was cancelled by the caller.
    WorkflowCancelled,
    /// An event subscriber failed.
    HandlerError,
}

impl ErrorCode {
    /// Whether a failure with this code may be re-attempted.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::TaskExecutionError | ErrorCode::TaskTimeout | ErrorCode::WorkerUnavailable
        )
    }

    /// Wire name, e.g. `TASK_TIMEOUT`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TaskValidationError => "TASK_VALIDATION_ERROR",
            ErrorCode::TaskExecutionError => "TASK_EXECUTION_ERROR",
            ErrorCode::TaskTimeout => "TASK_TIMEOUT",
            ErrorCode::TaskDistributionError => "TASK_DISTRIBUTION_ERROR",
            ErrorCode::TaskExpired => "TASK_EXPIRED",
            ErrorCode::WorkerUnavailable => "WORKER_UNAVAILABLE",
            ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ErrorCode::UnresolvedDependency => "UNRESOLVED_DEPENDENCY",
            ErrorCode::WorkflowCancelled => "WORKFLOW_CANCELLED",
            ErrorCode::HandlerError => "HANDLER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure attached to an unsuccessful [`TaskResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    /// Machine-readable failure class.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Structured context, such as the offending step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TaskError {
    /// A failure without details.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Metrics recorded for a single attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    /// Wall-clock time spent on the attempt.
    pub processing_time_ms: u64,
    /// Worker that ran the attempt, if one was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Number of attempts made, including this one.
    #[serde(default)]
    pub attempts: u32,
}

/// Outcome of one task attempt. A retried task yields one result per attempt;
/// only the last is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Agent output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure description; set exactly when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Timing and placement of the attempt.
    #[serde(default)]
    pub metrics: TaskMetrics,
}

impl TaskResult {
    /// A successful result carrying `data`.
    pub fn success(data: serde_json::Value, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metrics: TaskMetrics {
                processing_time_ms,
                worker_id: None,
                attempts: 1,
            },
        }
    }

    /// A failed result with a fresh [`TaskError`].
    pub fn failure(code: ErrorCode, message: impl Into<String>, processing_time_ms: u64) -> Self {
        Self::from_error(TaskError::new(code, message), processing_time_ms)
    }

    /// A failed result wrapping an existing error.
    pub fn from_error(error: TaskError, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metrics: TaskMetrics {
                processing_time_ms,
                worker_id: None,
                attempts: 1,
            },
        }
    }

    /// Record which worker produced the result.
    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.metrics.worker_id = Some(worker_id.into());
        self
    }

    /// Error code of a failed result.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Whether this result is a failure that retry policy allows re-attempting.
    pub fn is_retryable(&self) -> bool {
        !self.success && self.error_code().is_some_and(ErrorCode::is_retryable)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::TaskExecutionError.is_retryable());
        assert!(ErrorCode::TaskTimeout.is_retryable());
        assert!(ErrorCode::WorkerUnavailable.is_retryable());
        assert!(!ErrorCode::TaskValidationError.is_retryable());
        assert!(!ErrorCode::TaskDistributionError.is_retryable());
        assert!(!ErrorCode::TaskExpired.is_retryable());
        assert!(!ErrorCode::CircularDependency.is_retryable());
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::TaskValidationError).unwrap();
        assert_eq!(json, "\"TASK_VALIDATION_ERROR\"");
        assert_eq!(ErrorCode::CircularDependency.to_string(), "CIRCULAR_DEPENDENCY");
    }

    #[test]
    fn test_success_result() {
        let result = TaskResult::success(json!({"score": 0.9}), 12).with_worker("w1");
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.metrics.worker_id.as_deref(), Some("w1"));
        assert!(!result.is_retryable());
    }

    #[test]
    fn test_failure_result() {
        let result = TaskResult::failure(ErrorCode::TaskTimeout, "took too long", 30_000);
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::TaskTimeout));
        assert!(result.is_retryable());
        assert_eq!(
            result.error.as_ref().unwrap().to_string(),
            "TASK_TIMEOUT: took too long"
        );
    }
}
