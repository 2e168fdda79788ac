//! Monitoring Module
//!
//! Provides observability for the coordinator:
//! - Structured logging setup
//! - Round and endpoint metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogLevel, LoggerConfig};
pub use metrics::{CoordinatorMetrics, Counter, Gauge, MetricsSnapshot};
