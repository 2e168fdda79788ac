//! # fedcoord - Federated Learning Coordinator
//!
//! The server-side entry point of a federated learning deployment:
//! - **Coordinator**: picks what to run for a (topology, strategy) pair
//! - **Federated**: FedAvg aggregation over client updates
//! - **Endpoint**: versioned TCP endpoint clients submit updates to
//! - **Runtime**: cyclic scheduler, bounded executor, supervision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedcoord::coordinator::{FederationCoordinator, ResourceRoots};
//! use fedcoord::federated::FederateStrategy;
//!
//! #[tokio::main]
//! async fn main() {
//!     let roots = ResourceRoots::from_working_dir().unwrap();
//!     let mut coordinator =
//!         FederationCoordinator::cluster("0.0.0.0", 9000, "v1", FederateStrategy::FedAvg, roots).unwrap();
//!     coordinator.start().unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     coordinator.shutdown().await.unwrap();
//! }
//! ```

pub mod coordinator;
pub mod core;
pub mod endpoint;
pub mod federated;
pub mod monitoring;
pub mod runtime;

pub use coordinator::{CoordinatorConfig, CoordinatorEvent, FederationCoordinator};
pub use core::error::{Error, Result};
pub use federated::{FederateStrategy, Topology};
