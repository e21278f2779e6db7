use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};

/// What to do when the inbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room.
    #[default]
    DropOldest,
    /// Refuse the new event.
    RejectNew,
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Queue capacity before the overflow policy applies.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// What happens to a publish when the queue is full.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Events drained per processing tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay between processing ticks.
    #[serde(default = "default_processing_interval_ms")]
    pub processing_interval_ms: u64,
    /// Upper bound on a single handler attempt.
    #[serde(default = "default_event_processing_timeout_ms")]
    pub event_processing_timeout_ms: u64,
    /// Handler attempts per event, including the first.
    #[serde(default = "default_event_retry_attempts")]
    pub event_retry_attempts: u32,
    /// Delay before the first handler retry.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Cap on the handler retry delay.
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    /// Published events kept for history queries.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_max_queue_size() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    100
}
fn default_processing_interval_ms() -> u64 {
    10
}
fn default_event_processing_timeout_ms() -> u64 {
    5_000
}
fn default_event_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_base_ms() -> u64 {
    100
}
fn default_retry_backoff_max_ms() -> u64 {
    30_000
}
fn default_history_size() -> usize {
    1_000
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            overflow_policy: OverflowPolicy::default(),
            batch_size: default_batch_size(),
            processing_interval_ms: default_processing_interval_ms(),
            event_processing_timeout_ms: default_event_processing_timeout_ms(),
            event_retry_attempts: default_event_retry_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            history_size: default_history_size(),
        }
    }
}

impl EventBusConfig {
    /// Reject settings the bus cannot run with.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_queue_size == 0 {
            return Err(ConductorError::Config(
                "events.max_queue_size must be greater than zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConductorError::Config(
                "events.batch_size must be greater than zero".into(),
            ));
        }
        if self.processing_interval_ms == 0 {
            return Err(ConductorError::Config(
                "events.processing_interval_ms must be greater than zero".into(),
            ));
        }
        if self.event_processing_timeout_ms == 0 {
            return Err(ConductorError::Config(
                "events.event_processing_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.event_retry_attempts == 0 {
            return Err(ConductorError::Config(
                "events.event_retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Exponential backoff before retry number `attempt + 1`, capped at
    /// `retry_backoff_max_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .retry_backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.retry_backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EventBusConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_queue() {
        let config = EventBusConfig {
            max_queue_size: 0,
            ..EventBusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = EventBusConfig {
            retry_backoff_base_ms: 100,
            retry_backoff_max_ms: 1_000,
            ..EventBusConfig::default()
        };
        assert_eq!(config.backoff_ms(0), 100);
        assert_eq!(config.backoff_ms(1), 200);
        assert_eq!(config.backoff_ms(2), 400);
        assert_eq!(config.backoff_ms(5), 1_000);
        assert_eq!(config.backoff_ms(63), 1_000);
    }
}
