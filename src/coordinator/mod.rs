//! Coordinator Module
//!
//! Wires the federation together:
//! - Configuration (topology, strategy, address, resource roots, settings)
//! - The `FederationCoordinator` launch decision and lifecycle
//! - Operational events

pub mod config;
pub mod events;
pub mod federation;

pub use config::{ClusterAddress, CoordinatorConfig, CoordinatorSettings, ResourceRoots};
pub use events::CoordinatorEvent;
pub use federation::{FederationCoordinator, LaunchPlan, Lifecycle, ENDPOINT_TASK};
