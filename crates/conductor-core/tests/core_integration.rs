//! Wire format of the shared task types.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_core::*;
use serde_json::json;

#[test]
fn test_task_deserializes_from_camel_case_with_defaults() {
    let task: Task = serde_json::from_value(json!({
        "id": "6f1c1f2e-8a43-4c4b-9a56-0d3f2f0b9c11",
        "kind": "moderate",
        "priority": "critical",
        "payload": {"postId": 42},
        "createdAt": "2026-01-01T00:00:00Z"
    }))
    .unwrap();

    assert_eq!(task.priority, TaskPriority::Critical);
    assert_eq!(task.retry_count, 0);
    assert!(task.expires_at.is_none());
    assert!(task.timeout_ms.is_none());
    assert_eq!(task.payload["postId"], 42);
}

#[test]
fn test_failed_result_wire_shape() {
    let result = TaskResult::failure(ErrorCode::TaskTimeout, "task timed out after 50ms", 50)
        .with_worker("forecast-1");
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["success"], false);
    assert_eq!(value["error"]["code"], "TASK_TIMEOUT");
    assert_eq!(value["metrics"]["processingTimeMs"], 50);
    assert_eq!(value["metrics"]["workerId"], "forecast-1");
    assert!(value.get("data").is_none());
    assert!(result.is_retryable());
}

#[test]
fn test_retry_keeps_identity() {
    let task = Task::new("recommend", json!({})).with_max_retries(2);
    let retried = task.next_attempt().next_attempt();
    assert_eq!(retried.id, task.id);
    assert_eq!(retried.retry_count, 2);
    assert_eq!(retried.max_retries, Some(2));
}

#[test]
fn test_non_retryable_codes_are_terminal() {
    for code in [
        ErrorCode::TaskValidationError,
        ErrorCode::TaskDistributionError,
        ErrorCode::TaskExpired,
        ErrorCode::CircularDependency,
        ErrorCode::UnresolvedDependency,
    ] {
        let result = TaskResult::failure(code, "x", 0);
        assert!(!result.is_retryable(), "{code} must not be retried");
    }
}
