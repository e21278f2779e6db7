use async_trait::async_trait;
use conductor_core::{ConductorResult, Task};
use serde::{Deserialize, Serialize};

/// Self-reported health of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Whether the agent can take work.
    pub healthy: bool,
    /// Short status label, e.g. `ok`.
    pub status: String,
}

impl AgentHealth {
    /// An `ok` report.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            status: "ok".to_string(),
        }
    }

    /// A failing report with the given reason.
    pub fn unhealthy(status: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status: status.into(),
        }
    }
}

/// The contract every domain worker implements.
///
/// The orchestration core depends only on this trait. Lifecycle hooks have
/// no-op defaults so simple agents only provide `kind`, `capabilities` and
/// `execute_task`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Worker kind, used to bind workflow steps to workers.
    fn kind(&self) -> &str;

    /// Task kinds this agent can execute.
    fn capabilities(&self) -> Vec<String>;

    /// Whether the agent accepts `task`. Rejected tasks fail with
    /// `TASK_VALIDATION_ERROR` before execution.
    fn validate_task(&self, task: &Task) -> bool {
        self.capabilities().iter().any(|c| c == &task.kind)
    }

    /// Run the task. Errors become `TASK_EXECUTION_ERROR` results.
    async fn execute_task(&self, task: &Task) -> ConductorResult<serde_json::Value>;

    async fn health_check(&self) -> AgentHealth {
        AgentHealth::healthy()
    }

    /// Called on registration and on every restart.
    async fn initialize(&self) -> ConductorResult<()> {
        Ok(())
    }

    /// Called once the worker runtime has stopped.
    async fn shutdown(&self) {}
}
