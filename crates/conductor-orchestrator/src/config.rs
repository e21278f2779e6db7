use crate::balancer::LoadBalancingStrategy;
use conductor_core::{ConductorError, ConductorResult};
use conductor_events::EventBusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on in-flight `distribute` calls.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Default per-attempt timeout.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Period of the background health sweep.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Upper bound on a single worker ping.
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// Reset unhealthy workers instead of only excluding them.
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    /// Retry retryable failures when the task sets no budget of its own.
    #[serde(default = "default_true")]
    pub auto_retry: bool,
    /// Retries per task under `auto_retry`.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base delay before a retry; doubles with each attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Initial selection strategy.
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,
    /// How long a worker may drain its queue on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Error rate above which a worker is reported unhealthy.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Requests a worker must have served before its error rate is judged.
    #[serde(default = "default_min_requests_for_error_rate")]
    pub min_requests_for_error_rate: u64,
}

fn default_max_concurrent_tasks() -> usize {
    100
}
fn default_task_timeout_ms() -> u64 {
    30_000
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_health_check_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
fn default_max_error_rate() -> f64 {
    0.5
}
fn default_min_requests_for_error_rate() -> u64 {
    10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_ms: default_task_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            auto_restart: true,
            auto_retry: true,
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            load_balancing_strategy: LoadBalancingStrategy::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_error_rate: default_max_error_rate(),
            min_requests_for_error_rate: default_min_requests_for_error_rate(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject zero limits and an error rate outside `[0, 1]`.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConductorError::Config(
                "orchestrator.max_concurrent_tasks must be greater than zero".into(),
            ));
        }
        if self.task_timeout_ms == 0 {
            return Err(ConductorError::Config(
                "orchestrator.task_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.health_check_interval_ms == 0 || self.health_check_timeout_ms == 0 {
            return Err(ConductorError::Config(
                "orchestrator health check interval and timeout must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(ConductorError::Config(format!(
                "orchestrator.max_error_rate must be within [0, 1], got {}",
                self.max_error_rate
            )));
        }
        Ok(())
    }

    /// Delay before retry number `retry + 1`.
    pub fn retry_delay_ms(&self, retry: u32) -> u64 {
        self.retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(30_000)
    }
}

/// Top-level configuration file layout.
///
/// ```toml
/// [orchestrator]
/// task_timeout_ms = 10000
/// load_balancing_strategy = "round-robin"
///
/// [events]
/// max_queue_size = 5000
/// overflow_policy = "reject-new"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// `[orchestrator]` table.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// `[events]` table.
    #[serde(default)]
    pub events: EventBusConfig,
}

impl ConductorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ConductorResult<Self> {
        let config: ConductorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConductorError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate both tables.
    pub fn validate(&self) -> ConductorResult<()> {
        self.orchestrator.validate()?;
        self.events.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_events::OverflowPolicy;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ConductorConfig::from_toml_str("").unwrap();
        assert_eq!(config.orchestrator.max_concurrent_tasks, 100);
        assert_eq!(config.orchestrator.task_timeout_ms, 30_000);
        assert!(config.orchestrator.auto_restart);
        assert_eq!(
            config.orchestrator.load_balancing_strategy,
            LoadBalancingStrategy::LeastLoaded
        );
        assert_eq!(config.events.max_queue_size, 10_000);
        assert_eq!(config.events.event_retry_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = ConductorConfig::from_toml_str(
            r#"
            [orchestrator]
            task_timeout_ms = 500
            auto_restart = false
            max_retry_attempts = 1
            load_balancing_strategy = "round-robin"

            [events]
            max_queue_size = 16
            overflow_policy = "reject-new"
            event_processing_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.task_timeout_ms, 500);
        assert!(!config.orchestrator.auto_restart);
        assert_eq!(config.orchestrator.max_retry_attempts, 1);
        assert_eq!(
            config.orchestrator.load_balancing_strategy,
            LoadBalancingStrategy::RoundRobin
        );
        assert_eq!(config.events.max_queue_size, 16);
        assert_eq!(config.events.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.events.event_processing_timeout_ms, 250);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = ConductorConfig::from_toml_str(
            r#"
            [orchestrator]
            load_balancing_strategy = "fastest"
            "#,
        );
        assert!(matches!(err, Err(ConductorError::Toml(_))));
    }

    #[test]
    fn test_validation_errors() {
        let err = ConductorConfig::from_toml_str(
            r#"
            [orchestrator]
            max_error_rate = 1.5
            "#,
        );
        assert!(matches!(err, Err(ConductorError::Config(_))));

        let err = ConductorConfig::from_toml_str(
            r#"
            [events]
            batch_size = 0
            "#,
        );
        assert!(matches!(err, Err(ConductorError::Config(_))));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = OrchestratorConfig {
            retry_backoff_ms: 50,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.retry_delay_ms(0), 50);
        assert_eq!(config.retry_delay_ms(1), 100);
        assert_eq!(config.retry_delay_ms(2), 200);
        assert_eq!(config.retry_delay_ms(40), 30_000);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nhealth_check_interval_ms = 1000").unwrap();
        let config = ConductorConfig::load(file.path()).await.unwrap();
        assert_eq!(config.orchestrator.health_check_interval_ms, 1_000);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = ConductorConfig::load("/definitely/not/here.toml").await;
        assert!(matches!(err, Err(ConductorError::Config(_))));
    }
}
