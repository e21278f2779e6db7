use crate::agent::Agent;
use crate::balancer::LoadBalancingStrategy;
use crate::config::ConductorConfig;
use crate::coordinator::{WorkflowCoordinator, WorkflowOutcome};
use crate::engine::{Orchestrator, WorkerConfig};
use crate::types::{HealthReport, SystemHealth, SystemMetrics, WorkerRegistration};
use crate::workflow::Workflow;
use conductor_core::{ConductorResult, Task, TaskResult};
use conductor_events::{Event, EventBus, EventBusStats, HistoryQuery};
use std::sync::Arc;
use tracing::info;

/// Event bus, orchestrator and workflow coordinator wired from one
/// [`ConductorConfig`].
///
/// ```ignore
/// let conductor = Conductor::new(ConductorConfig::default())?;
/// conductor.start();
/// conductor.register_agent(Arc::new(MyAgent), WorkerConfig::new()).await?;
/// let result = conductor.submit_task(Task::new("summarize", payload)).await;
/// conductor.shutdown().await;
/// ```
pub struct Conductor {
    config: ConductorConfig,
    bus: EventBus,
    orchestrator: Arc<Orchestrator>,
    coordinator: WorkflowCoordinator,
}

impl Conductor {
    /// Validate `config` and build the bus, orchestrator and coordinator.
    /// Nothing runs until [`Conductor::start`].
    pub fn new(config: ConductorConfig) -> ConductorResult<Self> {
        config.validate()?;
        let bus = EventBus::new(config.events.clone());
        let orchestrator = Arc::new(Orchestrator::new(config.orchestrator.clone(), bus.clone()));
        let coordinator = WorkflowCoordinator::new(Arc::clone(&orchestrator));
        Ok(Self {
            config,
            bus,
            orchestrator,
            coordinator,
        })
    }

    /// Configuration the runtime was built with.
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Start the event processing loop and the periodic health checks.
    pub fn start(&self) {
        self.bus.start();
        self.orchestrator.start();
        info!(
            strategy = %self.orchestrator.load_balancing_strategy(),
            "Conductor started"
        );
    }

    /// Register an agent as a worker; see [`Orchestrator::register_worker`].
    pub async fn register_agent(
        &self,
        agent: Arc<dyn Agent>,
        config: WorkerConfig,
    ) -> ConductorResult<String> {
        self.orchestrator.register_worker(agent, config).await
    }

    /// Remove a worker; see [`Orchestrator::unregister_worker`].
    pub async fn unregister_agent(&self, worker_id: &str) -> ConductorResult<bool> {
        self.orchestrator.unregister_worker(worker_id).await
    }

    /// Route one task and wait for its terminal result.
    pub async fn submit_task(&self, task: Task) -> TaskResult {
        self.orchestrator.distribute(task).await
    }

    /// Run a workflow to completion.
    pub async fn submit_workflow(&self, workflow: Workflow) -> WorkflowOutcome {
        self.coordinator.submit_workflow(workflow).await
    }

    /// Switch the strategy used for subsequent selections.
    pub fn set_load_balancing_strategy(&self, strategy: LoadBalancingStrategy) {
        self.orchestrator.set_load_balancing_strategy(strategy);
    }

    /// Aggregate health of the worker pool.
    pub fn get_system_health(&self) -> SystemHealth {
        self.orchestrator.get_system_health()
    }

    /// Task distribution counters.
    pub fn get_metrics(&self) -> SystemMetrics {
        self.orchestrator.get_metrics()
    }

    /// Retained events matching `query`.
    pub fn get_event_history(&self, query: &HistoryQuery) -> Vec<Event> {
        self.bus.history(query)
    }

    /// Event bus counters.
    pub fn event_stats(&self) -> EventBusStats {
        self.bus.stats()
    }

    /// Run one health sweep immediately.
    pub async fn run_health_checks(&self) -> HealthReport {
        self.orchestrator.run_health_checks().await
    }

    /// Registered workers, ordered by id.
    pub fn workers(&self) -> Vec<WorkerRegistration> {
        self.orchestrator.workers()
    }

    /// The shared event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// The underlying orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The underlying workflow coordinator.
    pub fn coordinator(&self) -> &WorkflowCoordinator {
        &self.coordinator
    }

    /// Shut the workers down, then flush and stop the event bus.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.bus.shutdown().await;
        info!("Conductor shut down");
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("orchestrator", &self.orchestrator)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_core::ConductorError;
    use conductor_events::kinds;
    use serde_json::{json, Value};

    struct Upper;

    #[async_trait]
    impl Agent for Upper {
        fn kind(&self) -> &str {
            "text"
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["upper".into()]
        }

        async fn execute_task(&self, task: &Task) -> ConductorResult<Value> {
            let text = task.payload["text"].as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ConductorConfig::default();
        config.orchestrator.max_concurrent_tasks = 0;
        assert!(matches!(Conductor::new(config), Err(ConductorError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_task_and_observe() {
        let conductor = Conductor::new(ConductorConfig::default()).unwrap();
        conductor.start();
        conductor
            .register_agent(Arc::new(Upper), WorkerConfig::new().with_id("upper-1"))
            .await
            .unwrap();

        let result = conductor
            .submit_task(Task::new("upper", json!({"text": "hi"})))
            .await;
        assert_eq!(result.data, Some(json!("HI")));

        assert_eq!(conductor.get_metrics().completed_tasks, 1);
        assert_eq!(conductor.workers().len(), 1);
        let registered = conductor.get_event_history(&HistoryQuery::new().kind(kinds::WORKER_REGISTERED));
        assert_eq!(registered.len(), 1);

        conductor.shutdown().await;
        assert!(!conductor.event_bus().is_running());
        assert!(conductor.workers().is_empty());
    }
}
