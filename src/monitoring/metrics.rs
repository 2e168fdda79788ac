//! Coordinator metrics.
//!
//! Atomic counters and gauges, bundled per coordinator.

use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric (monotonically increasing).
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by amount.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64, // f64 bits
}

impl Gauge {
    /// Create a new gauge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge value.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Metrics kept by one coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub rounds_completed: Counter,
    pub rounds_failed: Counter,
    pub updates_aggregated: Counter,
    pub endpoint_starts: Counter,
    pub endpoint_failures: Counter,
    pub last_round_ms: Gauge,
}

impl CoordinatorMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_completed: self.rounds_completed.get(),
            rounds_failed: self.rounds_failed.get(),
            updates_aggregated: self.updates_aggregated.get(),
            endpoint_starts: self.endpoint_starts.get(),
            endpoint_failures: self.endpoint_failures.get(),
            last_round_ms: self.last_round_ms.get(),
            taken_at: now(),
        }
    }
}

/// Serializable metrics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rounds_completed: u64,
    pub rounds_failed: u64,
    pub updates_aggregated: u64,
    pub endpoint_starts: u64,
    pub endpoint_failures: u64,
    pub last_round_ms: f64,
    pub taken_at: Timestamp,
}
