//! Coordinator events.
//!
//! Background activities report state changes and failures here instead of
//! dying silently.

use crate::federated::{FederateStrategy, RoundReport, Topology};
use serde::{Deserialize, Serialize};

/// An operational state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    /// `start` completed
    Started {
        topology: Topology,
        strategy: FederateStrategy,
    },
    /// An aggregation round finished
    RoundCompleted(RoundReport),
    /// An aggregation round failed; the scheduler keeps going
    RoundFailed { tick: u64, error: String },
    /// The endpoint is being (re)started
    EndpointStarting { attempt: u32, address: String },
    /// The endpoint failed
    EndpointFailed {
        attempt: u32,
        error: String,
        will_restart: bool,
    },
    /// The endpoint stopped cleanly
    EndpointStopped,
    /// `shutdown` completed
    Stopped,
}

impl CoordinatorEvent {
    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CoordinatorEvent::RoundFailed { .. } | CoordinatorEvent::EndpointFailed { .. }
        )
    }
}
