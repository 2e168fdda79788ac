//! Federated Learning Module
//!
//! Provides the pieces the coordinator wires together:
//! - Topology and federate strategy selection
//! - The aggregation engine seam and a FedAvg reference engine
//! - Shared update/model state between engine and endpoint

pub mod aggregator;
pub mod store;
pub mod strategy;

pub use aggregator::{fed_avg, stage_update, AggregationEngine, FedAvgEngine, RoundReport};
pub use store::{ClientUpdate, FederationState, GlobalModel, ModelRegistry, UpdateStore};
pub use strategy::{FederateStrategy, Topology};
