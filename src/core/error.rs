//! Error types for the federation coordinator.

use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running a federation.
#[derive(Error, Debug)]
pub enum Error {
    // Construction errors
    #[error("Strategy {strategy} has no supported plan in {topology} topology")]
    UnsupportedStrategy { topology: String, strategy: String },

    #[error("Unknown federate strategy: {0}")]
    UnknownStrategy(String),

    #[error("Unknown topology: {0}")]
    UnknownTopology(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Lifecycle errors
    #[error("Coordinator already started")]
    AlreadyStarted,

    #[error("No tokio runtime available to start background tasks")]
    NoRuntime,

    // Background activity errors
    #[error("Communication endpoint failed at {address}: {reason}")]
    EndpointStart { address: String, reason: String },

    #[error("Aggregation round failed: {0}")]
    AggregationRound(String),

    #[error("Task executor is shut down")]
    ExecutorShutdown,

    #[error("Task {name} failed: {reason}")]
    TaskFailed { name: String, reason: String },

    // Protocol errors
    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    ProtocolVersionMismatch { expected: String, got: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
