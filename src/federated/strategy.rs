//! Execution topology and federate strategy.

use crate::core::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Deployment shape of the federation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// In-process aggregation, no network endpoint
    Standalone,
    /// Aggregation alongside a network-facing endpoint
    Cluster,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Standalone => write!(f, "standalone"),
            Topology::Cluster => write!(f, "cluster"),
        }
    }
}

impl FromStr for Topology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standalone" => Ok(Topology::Standalone),
            "cluster" => Ok(Topology::Cluster),
            other => Err(Error::UnknownTopology(other.to_string())),
        }
    }
}

/// Family of aggregation algorithm and orchestration shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederateStrategy {
    /// Weighted averaging of client models on the server
    FedAvg,
    /// Knowledge distillation between clients, no server aggregator
    FedDistillation,
}

impl Default for FederateStrategy {
    fn default() -> Self {
        Self::FedAvg
    }
}

impl std::fmt::Display for FederateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FederateStrategy::FedAvg => write!(f, "fed_avg"),
            FederateStrategy::FedDistillation => write!(f, "fed_distillation"),
        }
    }
}

impl FromStr for FederateStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fed_avg" | "fedavg" => Ok(FederateStrategy::FedAvg),
            "fed_distillation" | "feddistillation" => Ok(FederateStrategy::FedDistillation),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}
