//! Federation coordinator.
//!
//! Decides, per (topology, strategy), which subsystems start: the
//! communication endpoint (cluster only), submitted to the task executor, and
//! the aggregation cadence, driven by a cyclic scheduler.

use crate::coordinator::config::{ClusterAddress, CoordinatorConfig, CoordinatorSettings, ResourceRoots};
use crate::coordinator::events::CoordinatorEvent;
use crate::core::{Error, Result};
use crate::endpoint::{CommunicationEndpoint, TcpEndpoint};
use crate::federated::{AggregationEngine, FedAvgEngine, FederateStrategy, FederationState, Topology};
use crate::monitoring::{CoordinatorMetrics, MetricsSnapshot};
use crate::runtime::{
    supervise, CyclicScheduler, FailureHook, SchedulerHandle, Shutdown, SupervisorEvent, TaskExecutor,
    TaskHandle,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// How long `shutdown` waits for the endpoint to stop on its own.
const ENDPOINT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Name the endpoint task is submitted under.
pub const ENDPOINT_TASK: &str = "communication-endpoint";

/// Subsystems a (topology, strategy) pair starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Start the communication endpoint
    pub endpoint: bool,
    /// Start the aggregation scheduler
    pub aggregator: bool,
}

impl LaunchPlan {
    /// Resolve the plan, rejecting pairs with nothing sensible to run.
    pub fn resolve(topology: Topology, strategy: FederateStrategy) -> Result<Self> {
        match (topology, strategy) {
            (Topology::Standalone, FederateStrategy::FedAvg) => Ok(Self {
                endpoint: false,
                aggregator: true,
            }),
            (Topology::Standalone, FederateStrategy::FedDistillation) => Err(Error::UnsupportedStrategy {
                topology: topology.to_string(),
                strategy: strategy.to_string(),
            }),
            (Topology::Cluster, FederateStrategy::FedAvg) => Ok(Self {
                endpoint: true,
                aggregator: true,
            }),
            (Topology::Cluster, FederateStrategy::FedDistillation) => Ok(Self {
                endpoint: true,
                aggregator: false,
            }),
        }
    }
}

/// Coordinator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built, not started
    Created,
    /// Background activities launched
    Running,
    /// Shut down
    Stopped,
}

/// The federation coordinator.
pub struct FederationCoordinator {
    id: Uuid,
    topology: Topology,
    strategy: FederateStrategy,
    address: Option<ClusterAddress>,
    roots: ResourceRoots,
    settings: CoordinatorSettings,
    plan: LaunchPlan,
    state: FederationState,
    engine: Option<Arc<dyn AggregationEngine>>,
    endpoint: Option<Arc<dyn CommunicationEndpoint>>,
    executor: TaskExecutor,
    lifecycle: Lifecycle,
    scheduler: Option<SchedulerHandle>,
    endpoint_task: Option<TaskHandle<()>>,
    shutdown: Shutdown,
    events: broadcast::Sender<CoordinatorEvent>,
    metrics: Arc<CoordinatorMetrics>,
}

impl FederationCoordinator {
    /// Standalone coordinator: in-process aggregation, no endpoint.
    pub fn standalone(strategy: FederateStrategy, roots: ResourceRoots) -> Result<Self> {
        Self::from_config(CoordinatorConfig::standalone(strategy).with_roots(roots))
    }

    /// Cluster coordinator. Host, port and version are kept verbatim.
    pub fn cluster(
        host: &str,
        port: u16,
        api_version: &str,
        strategy: FederateStrategy,
        roots: ResourceRoots,
    ) -> Result<Self> {
        Self::from_config(CoordinatorConfig::cluster(host, port, api_version, strategy).with_roots(roots))
    }

    /// Build from a full configuration.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let plan = LaunchPlan::resolve(config.topology, config.strategy)?;
        let state = FederationState::new();

        let engine: Option<Arc<dyn AggregationEngine>> = if plan.aggregator {
            Some(Arc::new(FedAvgEngine::new(
                config.topology,
                config.roots.clone(),
                state.clone(),
            )))
        } else {
            None
        };
        let endpoint: Option<Arc<dyn CommunicationEndpoint>> = if plan.endpoint {
            Some(Arc::new(
                TcpEndpoint::new(state.clone()).accepting_updates(plan.aggregator),
            ))
        } else {
            None
        };

        let (events, _) = broadcast::channel(config.settings.event_capacity.max(1));

        Ok(Self {
            id: Uuid::new_v4(),
            topology: config.topology,
            strategy: config.strategy,
            address: config.cluster,
            roots: config.roots,
            executor: TaskExecutor::new(config.settings.executor_capacity),
            settings: config.settings,
            plan,
            state,
            engine,
            endpoint,
            lifecycle: Lifecycle::Created,
            scheduler: None,
            endpoint_task: None,
            shutdown: Shutdown::new(),
            events,
            metrics: Arc::new(CoordinatorMetrics::new()),
        })
    }

    /// Replace the aggregation engine.
    pub fn with_engine(mut self, engine: Arc<dyn AggregationEngine>) -> Result<Self> {
        if !self.plan.aggregator {
            return Err(Error::Configuration(format!(
                "{} in {} topology runs no server aggregator",
                self.strategy, self.topology
            )));
        }
        self.engine = Some(engine);
        Ok(self)
    }

    /// Replace the communication endpoint.
    pub fn with_endpoint(mut self, endpoint: Arc<dyn CommunicationEndpoint>) -> Result<Self> {
        if !self.plan.endpoint {
            return Err(Error::Configuration(format!(
                "{} topology never starts an endpoint",
                self.topology
            )));
        }
        self.endpoint = Some(endpoint);
        Ok(self)
    }

    /// Coordinator id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deployment topology.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Federate strategy.
    pub fn strategy(&self) -> FederateStrategy {
        self.strategy
    }

    /// Endpoint address (cluster only).
    pub fn address(&self) -> Option<&ClusterAddress> {
        self.address.as_ref()
    }

    /// Resource roots.
    pub fn roots(&self) -> &ResourceRoots {
        &self.roots
    }

    /// Runtime settings.
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Subsystems `start` launches.
    pub fn plan(&self) -> LaunchPlan {
        self.plan
    }

    /// Shared update/model state.
    pub fn state(&self) -> &FederationState {
        &self.state
    }

    /// Whether a server-side aggregation engine is present.
    pub fn has_aggregator(&self) -> bool {
        self.engine.is_some()
    }

    /// The task executor.
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Scheduler ticks so far, if the scheduler was started.
    pub fn scheduler_ticks(&self) -> Option<u64> {
        self.scheduler.as_ref().map(SchedulerHandle::ticks)
    }

    /// Whether the endpoint task has ended.
    pub fn endpoint_finished(&self) -> Option<bool> {
        self.endpoint_task.as_ref().map(TaskHandle::is_finished)
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Launch the background activities and return immediately.
    ///
    /// Needs an ambient tokio runtime. May be called once.
    pub fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(Error::AlreadyStarted);
        }
        tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        info!(coordinator = %self.id, "Work mode: {}", self.topology);

        match self.topology {
            Topology::Standalone => {
                self.start_aggregator()?;
                info!(coordinator = %self.id, "{} aggregator started", self.strategy);
            }
            Topology::Cluster => {
                self.start_endpoint()?;
                if self.plan.aggregator {
                    self.start_aggregator()?;
                    info!(coordinator = %self.id, "{} communication server started", self.strategy);
                    info!(coordinator = %self.id, "{} aggregator started", self.strategy);
                } else {
                    info!(coordinator = %self.id, "{} communication server started", self.strategy);
                    info!(
                        coordinator = %self.id,
                        "{} aggregation mode has no server aggregator", self.strategy
                    );
                }
            }
        }

        self.lifecycle = Lifecycle::Running;
        let _ = self.events.send(CoordinatorEvent::Started {
            topology: self.topology,
            strategy: self.strategy,
        });
        Ok(())
    }

    fn start_endpoint(&mut self) -> Result<()> {
        let (Some(endpoint), Some(address)) = (self.endpoint.clone(), self.address.clone()) else {
            return Err(Error::Configuration(
                "cluster topology requires an endpoint and an address".to_string(),
            ));
        };

        let policy = self.settings.restart_policy.clone();
        let signal = self.shutdown.signal();
        let events = self.events.clone();
        let metrics = self.metrics.clone();

        let task = self.executor.submit(ENDPOINT_TASK, async move {
            let activity = format!("{}-endpoint", endpoint.name());
            supervise(
                &activity,
                &policy,
                signal.clone(),
                || {
                    let endpoint = endpoint.clone();
                    let address = address.clone();
                    let signal = signal.clone();
                    async move { endpoint.serve(&address, signal).await }
                },
                |event| {
                    let event = match event {
                        SupervisorEvent::Starting { attempt } => {
                            metrics.endpoint_starts.inc();
                            CoordinatorEvent::EndpointStarting {
                                attempt,
                                address: address.authority(),
                            }
                        }
                        SupervisorEvent::Failed {
                            attempt,
                            error,
                            will_restart,
                        } => {
                            metrics.endpoint_failures.inc();
                            CoordinatorEvent::EndpointFailed {
                                attempt,
                                error,
                                will_restart,
                            }
                        }
                        SupervisorEvent::Stopped { .. } => CoordinatorEvent::EndpointStopped,
                    };
                    let _ = events.send(event);
                },
            )
            .await
        })?;

        self.endpoint_task = Some(task);
        Ok(())
    }

    fn start_aggregator(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let engine = self.engine.clone().ok_or_else(|| Error::UnsupportedStrategy {
            topology: self.topology.to_string(),
            strategy: self.strategy.to_string(),
        })?;

        let events = self.events.clone();
        let metrics = self.metrics.clone();
        let action = move || {
            let engine = engine.clone();
            let events = events.clone();
            let metrics = metrics.clone();
            async move {
                let started = Instant::now();
                let report = engine.run_round().await?;
                metrics.rounds_completed.inc();
                metrics.updates_aggregated.add(report.updates_consumed as u64);
                metrics.last_round_ms.set(started.elapsed().as_secs_f64() * 1000.0);
                if !report.is_noop() {
                    info!(
                        engine = %engine.name(),
                        round = report.round,
                        jobs = report.jobs_aggregated,
                        updates = report.updates_consumed,
                        "Aggregation round completed"
                    );
                }
                let _ = events.send(CoordinatorEvent::RoundCompleted(report));
                Ok::<(), Error>(())
            }
        };

        let events = self.events.clone();
        let metrics = self.metrics.clone();
        let hook: FailureHook = Arc::new(move |tick, err| {
            metrics.rounds_failed.inc();
            let _ = events.send(CoordinatorEvent::RoundFailed {
                tick,
                error: err.to_string(),
            });
        });

        let name = format!("{}-aggregator", self.strategy);
        let handle = CyclicScheduler::new(&name, self.settings.round_period(), action)
            .on_failure(hook)
            .start()?;
        self.scheduler = Some(handle);
        Ok(())
    }

    /// Wait for the endpoint task to end and take its result.
    ///
    /// `None` if no endpoint was started or its result was already taken.
    pub async fn wait_endpoint(&mut self) -> Option<Result<()>> {
        let task = self.endpoint_task.take()?;
        Some(task.join().await)
    }

    /// Stop the scheduler, signal the endpoint and drain the executor.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Stopped {
            return Ok(());
        }
        self.shutdown.trigger();

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop_and_join().await?;
        }

        if let Some(task) = self.endpoint_task.take() {
            match tokio::time::timeout(ENDPOINT_DRAIN_TIMEOUT, task.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(coordinator = %self.id, error = %e, "Endpoint ended with error"),
                Err(_) => warn!(coordinator = %self.id, "Endpoint did not stop in time, aborting"),
            }
        }

        self.executor.shutdown();
        self.lifecycle = Lifecycle::Stopped;
        let _ = self.events.send(CoordinatorEvent::Stopped);
        info!(coordinator = %self.id, "Coordinator stopped");
        Ok(())
    }
}
