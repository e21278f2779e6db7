//! Task orchestration engine: worker runtimes, load balancing, health
//! monitoring and dependency-ordered workflows.
//!
//! Agents are registered with the [`Orchestrator`], which wraps each one in a
//! [`WorkerRuntime`] owning its own priority queue. Every task is routed to an
//! eligible worker by the configured [`LoadBalancingStrategy`], raced against
//! a timeout and retried under a bounded policy. The [`WorkflowCoordinator`]
//! runs DAGs of steps through the orchestrator, and [`Conductor`] wires the
//! whole runtime from one configuration.
//!
//! # Main types
//!
//! - [`Conductor`] — Facade exposing the submission and observability API.
//! - [`Orchestrator`] — Worker registry, task distribution, retries and health checks.
//! - [`WorkflowCoordinator`] — Executes [`Workflow`]s in ready-step batches.
//! - [`WorkerRuntime`] — Per-agent queue, executor and metrics.
//! - [`Agent`] — The contract every domain worker implements.
//! - [`ConductorConfig`] — TOML-loadable configuration for the whole runtime.

/// The agent contract.
pub mod agent;
/// Worker selection strategies.
pub mod balancer;
/// Facade wiring bus, orchestrator and coordinator.
pub mod conductor;
/// Runtime configuration.
pub mod config;
/// Workflow execution.
pub mod coordinator;
/// Worker registry and task distribution.
pub mod engine;
/// Per-worker status and metrics tracking.
pub mod monitor;
/// Per-worker priority queue.
pub mod task_queue;
/// Shared orchestration types (statuses, metrics, health snapshots).
pub mod types;
/// Per-agent worker runtime.
pub mod worker;
/// Workflow and step definitions.
pub mod workflow;

pub use agent::{Agent, AgentHealth};
pub use balancer::LoadBalancingStrategy;
pub use conductor::Conductor;
pub use config::{ConductorConfig, OrchestratorConfig};
pub use coordinator::{WorkflowCoordinator, WorkflowOutcome};
pub use engine::{Orchestrator, WorkerConfig};
pub use monitor::WorkerMonitor;
pub use task_queue::{QueuedTask, TaskQueue};
pub use types::{
    HealthReport, HealthStatus, SystemHealth, SystemMetrics, WorkerHealth, WorkerMetrics,
    WorkerRegistration, WorkerSnapshot, WorkerStatus,
};
pub use worker::WorkerRuntime;
pub use workflow::{Workflow, WorkflowStatus, WorkflowStep};
