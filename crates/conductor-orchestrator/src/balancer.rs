use crate::types::WorkerMetrics;
use conductor_core::ConductorError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Policy used to pick one worker among the eligible candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    /// Minimize `(total - successful) + error_rate * 10`.
    #[default]
    LeastLoaded,
    /// `distributed_so_far mod eligible_count`.
    RoundRobin,
    /// Maximize capability, reliability and speed score.
    CapabilityBased,
    /// Uniform choice.
    Random,
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadBalancingStrategy::LeastLoaded => write!(f, "least-loaded"),
            LoadBalancingStrategy::RoundRobin => write!(f, "round-robin"),
            LoadBalancingStrategy::CapabilityBased => write!(f, "capability-based"),
            LoadBalancingStrategy::Random => write!(f, "random"),
        }
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least-loaded" => Ok(LoadBalancingStrategy::LeastLoaded),
            "round-robin" => Ok(LoadBalancingStrategy::RoundRobin),
            "capability-based" => Ok(LoadBalancingStrategy::CapabilityBased),
            "random" => Ok(LoadBalancingStrategy::Random),
            other => Err(ConductorError::Config(format!(
                "unknown load balancing strategy '{other}'"
            ))),
        }
    }
}

/// Lower is better.
pub fn load_score(metrics: &WorkerMetrics) -> f64 {
    let outstanding = metrics.total_requests.saturating_sub(metrics.successful_requests) as f64;
    outstanding + metrics.error_rate * 10.0
}

/// Higher is better.
pub fn capability_score(metrics: &WorkerMetrics, has_capability: bool) -> f64 {
    let capability = if has_capability { 1.0 } else { 0.0 };
    let reliability = 0.5 * (1.0 - metrics.error_rate);
    let speed = 0.3 * (1.0 - metrics.avg_response_time_ms / 10_000.0).max(0.0);
    capability + reliability + speed
}

/// Pick the index of the candidate to dispatch to. Every candidate is assumed
/// to hold the task's capability. Ties go to the earliest candidate.
pub fn select(
    strategy: LoadBalancingStrategy,
    candidates: &[&WorkerMetrics],
    distributed_so_far: u64,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let index = match strategy {
        LoadBalancingStrategy::LeastLoaded => {
            let mut best = 0;
            for (i, metrics) in candidates.iter().enumerate().skip(1) {
                if load_score(metrics) < load_score(candidates[best]) {
                    best = i;
                }
            }
            best
        }
        LoadBalancingStrategy::RoundRobin => (distributed_so_far % candidates.len() as u64) as usize,
        LoadBalancingStrategy::CapabilityBased => {
            let mut best = 0;
            for (i, metrics) in candidates.iter().enumerate().skip(1) {
                if capability_score(metrics, true) > capability_score(candidates[best], true) {
                    best = i;
                }
            }
            best
        }
        LoadBalancingStrategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
    };
    Some(index)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn metrics(total: u64, successful: u64, avg_ms: f64) -> WorkerMetrics {
        let failed = total - successful;
        WorkerMetrics {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            avg_response_time_ms: avg_ms,
            error_rate: if total == 0 {
                0.0
            } else {
                failed as f64 / total as f64
            },
            ..WorkerMetrics::default()
        }
    }

    #[test]
    fn test_empty_candidates() {
        assert!(select(LoadBalancingStrategy::LeastLoaded, &[], 0).is_none());
        assert!(select(LoadBalancingStrategy::Random, &[], 0).is_none());
    }

    #[test]
    fn test_load_score_formula() {
        // 10 total / 9 ok: 1 outstanding + 0.1 * 10
        assert!((load_score(&metrics(10, 9, 0.0)) - 2.0).abs() < 1e-9);
        // 10 total / 5 ok: 5 outstanding + 0.5 * 10
        assert!((load_score(&metrics(10, 5, 0.0)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_least_loaded_prefers_lower_score() {
        let a = metrics(10, 9, 0.0);
        let b = metrics(10, 5, 0.0);
        assert_eq!(select(LoadBalancingStrategy::LeastLoaded, &[&a, &b], 0), Some(0));
        assert_eq!(select(LoadBalancingStrategy::LeastLoaded, &[&b, &a], 0), Some(1));
    }

    #[test]
    fn test_least_loaded_tie_goes_to_first() {
        let a = metrics(0, 0, 0.0);
        let b = metrics(0, 0, 0.0);
        assert_eq!(select(LoadBalancingStrategy::LeastLoaded, &[&a, &b], 0), Some(0));
    }

    #[test]
    fn test_round_robin_cycles() {
        let a = metrics(0, 0, 0.0);
        let b = metrics(0, 0, 0.0);
        let c = metrics(0, 0, 0.0);
        let picks: Vec<usize> = (0..6)
            .map(|n| select(LoadBalancingStrategy::RoundRobin, &[&a, &b, &c], n).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_capability_score_formula() {
        let fresh = metrics(0, 0, 0.0);
        assert!((capability_score(&fresh, true) - 1.8).abs() < 1e-9);
        assert!((capability_score(&fresh, false) - 0.8).abs() < 1e-9);
        // Slower than 10s contributes nothing for speed.
        let slow = metrics(10, 10, 20_000.0);
        assert!((capability_score(&slow, true) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_capability_based_prefers_reliable_fast_worker() {
        let flaky = metrics(10, 5, 100.0);
        let slow = metrics(10, 10, 9_000.0);
        let good = metrics(10, 10, 100.0);
        assert_eq!(
            select(LoadBalancingStrategy::CapabilityBased, &[&flaky, &slow, &good], 0),
            Some(2)
        );
    }

    #[test]
    fn test_random_stays_in_range() {
        let a = metrics(0, 0, 0.0);
        let b = metrics(0, 0, 0.0);
        for _ in 0..100 {
            let pick = select(LoadBalancingStrategy::Random, &[&a, &b], 0).unwrap();
            assert!(pick < 2);
        }
    }

    #[test]
    fn test_strategy_parsing_and_display() {
        for s in ["least-loaded", "round-robin", "capability-based", "random"] {
            let strategy: LoadBalancingStrategy = s.parse().unwrap();
            assert_eq!(strategy.to_string(), s);
        }
        assert!("fastest".parse::<LoadBalancingStrategy>().is_err());
        let json = serde_json::to_string(&LoadBalancingStrategy::CapabilityBased).unwrap();
        assert_eq!(json, "\"capability-based\"");
    }
}
