//! Coordinator configuration.
//!
//! Everything the coordinator needs is passed in explicitly; nothing is read
//! from the environment or computed into process-wide constants.

use crate::core::{Error, Result};
use crate::federated::{FederateStrategy, Topology};
use crate::runtime::supervisor::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default period between aggregation rounds.
pub const DEFAULT_ROUND_PERIOD_MS: u64 = 5_000;

/// Default task executor capacity.
pub const DEFAULT_EXECUTOR_CAPACITY: usize = 5;

/// The two filesystem roots the aggregation engine works in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRoots {
    /// Job artifacts (staged client updates per job)
    pub job_root: PathBuf,
    /// Base and aggregated models per job
    pub model_root: PathBuf,
}

impl ResourceRoots {
    /// Create roots from explicit paths.
    pub fn new(job_root: impl Into<PathBuf>, model_root: impl Into<PathBuf>) -> Self {
        Self {
            job_root: job_root.into(),
            model_root: model_root.into(),
        }
    }

    /// `res/jobs_server` and `res/models` under `base`.
    pub fn under(base: &Path) -> Self {
        let res = base.join("res");
        Self::new(res.join("jobs_server"), res.join("models"))
    }

    /// Roots under the current working directory, resolved now.
    pub fn from_working_dir() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::under(&cwd))
    }

    /// Directory holding staged updates for a job.
    pub fn job_updates_dir(&self, job_id: &str) -> PathBuf {
        self.job_root.join(job_id).join("updates")
    }

    /// Directory holding models for a job.
    pub fn job_models_dir(&self, job_id: &str) -> PathBuf {
        self.model_root.join(job_id)
    }
}

impl Default for ResourceRoots {
    /// Roots under the working directory at the time of the call.
    fn default() -> Self {
        Self::from_working_dir().unwrap_or_else(|_| Self::under(Path::new(".")))
    }
}

/// Network address of the communication endpoint.
///
/// Values are stored verbatim; problems surface when the endpoint resolves
/// the address at start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAddress {
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// API / protocol version tag
    pub api_version: String,
}

impl ClusterAddress {
    /// Create an address.
    pub fn new(host: &str, port: u16, api_version: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            api_version: api_version.to_string(),
        }
    }

    /// `host:port` form.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Resolve to a socket address.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if self.api_version.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "empty api version for endpoint {}",
                self.authority()
            )));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "empty host for endpoint on port {}",
                self.port
            )));
        }

        let authority = self.authority();
        let mut addrs = tokio::net::lookup_host(authority.as_str())
            .await
            .map_err(|e| Error::Configuration(format!("cannot resolve {}: {}", authority, e)))?;
        addrs
            .next()
            .ok_or_else(|| Error::Configuration(format!("{} resolved to no address", authority)))
    }
}

impl std::fmt::Display for ClusterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (api {})", self.authority(), self.api_version)
    }
}

/// Timing, pool and supervision knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Period between aggregation rounds (milliseconds)
    pub round_period_ms: u64,
    /// Maximum concurrently running executor tasks
    pub executor_capacity: usize,
    /// What to do when the endpoint fails
    pub restart_policy: RestartPolicy,
    /// Capacity of the coordinator event channel
    pub event_capacity: usize,
}

impl CoordinatorSettings {
    /// Round period as a duration.
    pub fn round_period(&self) -> Duration {
        Duration::from_millis(self.round_period_ms)
    }

    /// Override the round period.
    pub fn with_round_period(mut self, period: Duration) -> Self {
        self.round_period_ms = period.as_millis() as u64;
        self
    }

    /// Override the restart policy.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            round_period_ms: DEFAULT_ROUND_PERIOD_MS,
            executor_capacity: DEFAULT_EXECUTOR_CAPACITY,
            restart_policy: RestartPolicy::default(),
            event_capacity: 256,
        }
    }
}

/// Full coordinator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deployment topology
    pub topology: Topology,
    /// Federate strategy
    #[serde(default)]
    pub strategy: FederateStrategy,
    /// Endpoint address (cluster only)
    #[serde(default)]
    pub cluster: Option<ClusterAddress>,
    /// Resource roots
    #[serde(default)]
    pub roots: ResourceRoots,
    /// Runtime settings
    #[serde(default)]
    pub settings: CoordinatorSettings,
}

impl CoordinatorConfig {
    /// Standalone configuration.
    pub fn standalone(strategy: FederateStrategy) -> Self {
        Self {
            topology: Topology::Standalone,
            strategy,
            cluster: None,
            roots: ResourceRoots::default(),
            settings: CoordinatorSettings::default(),
        }
    }

    /// Cluster configuration.
    pub fn cluster(host: &str, port: u16, api_version: &str, strategy: FederateStrategy) -> Self {
        Self {
            topology: Topology::Cluster,
            strategy,
            cluster: Some(ClusterAddress::new(host, port, api_version)),
            roots: ResourceRoots::default(),
            settings: CoordinatorSettings::default(),
        }
    }

    /// Set resource roots.
    pub fn with_roots(mut self, roots: ResourceRoots) -> Self {
        self.roots = roots;
        self
    }

    /// Set runtime settings.
    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Check structural consistency between topology and address.
    pub fn validate(&self) -> Result<()> {
        match (self.topology, &self.cluster) {
            (Topology::Cluster, None) => Err(Error::Configuration(
                "cluster topology requires an endpoint address".to_string(),
            )),
            (Topology::Standalone, Some(addr)) => Err(Error::Configuration(format!(
                "standalone topology cannot expose endpoint {}",
                addr
            ))),
            _ => {
                if self.settings.executor_capacity == 0 {
                    return Err(Error::Configuration(
                        "executor capacity must be at least 1".to_string(),
                    ));
                }
                if self.settings.round_period_ms == 0 {
                    return Err(Error::Configuration(
                        "round period must be positive".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
