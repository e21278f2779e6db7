//! Core types and error definitions for the Conductor task orchestration runtime.
//!
//! This crate provides the foundational types shared across all Conductor crates:
//! the unified error type, the unit of work ([`Task`]) and the structured outcome
//! of one task attempt ([`TaskResult`]).
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Task`] — A unit of work with a kind, a priority and a JSON payload.
//! - [`TaskPriority`] — Scheduling priority (`low` < `medium` < `high` < `critical`).
//! - [`TaskResult`] — Outcome of a task attempt, success or structured failure.
//! - [`ErrorCode`] — Error taxonomy carried by failed task results.

/// Unified error type.
pub mod error;
/// Task results and the task-level error taxonomy.
pub mod result;
/// Task definition and priorities.
pub mod task;

pub use error::{ConductorError, ConductorResult};
pub use result::{ErrorCode, TaskError, TaskMetrics, TaskResult};
pub use task::{Task, TaskPriority};
