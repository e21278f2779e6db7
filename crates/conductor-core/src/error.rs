use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor runtime.
///
/// Task-level failures travel as [`crate::TaskResult`] values; this enum is
/// reserved for misuse of the API and infrastructure failures.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by a worker runtime (e.g. submit after shutdown).
    #[error("Worker error: {0}")]
    Worker(String),

    /// An error raised by the orchestrator registry.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A structural error in a workflow definition.
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// An error raised by the event bus.
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// An error raised inside agent logic.
    #[error("Agent error: {0}")]
    Agent(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A TOML document could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
