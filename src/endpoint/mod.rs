//! Communication Endpoint Module
//!
//! The network-facing side of a cluster federation:
//! - `CommunicationEndpoint` trait the coordinator launches
//! - Length-prefixed, versioned wire protocol
//! - TCP server and client

pub mod client;
pub mod protocol;
pub mod server;

pub use client::EndpointClient;
pub use protocol::{Request, RequestBody, Response, MAX_FRAME_BYTES};
pub use server::{TcpEndpoint, MAX_SAMPLE_COUNT};

use crate::coordinator::config::ClusterAddress;
use crate::core::Result;
use crate::runtime::ShutdownSignal;
use async_trait::async_trait;

/// A network service clients connect to.
///
/// `serve` runs for the endpoint's whole lifetime and returns when
/// `shutdown` fires (`Ok`) or the endpoint cannot continue (`Err`).
#[async_trait]
pub trait CommunicationEndpoint: Send + Sync {
    /// Serve on `address` until shutdown.
    async fn serve(&self, address: &ClusterAddress, shutdown: ShutdownSignal) -> Result<()>;

    /// Endpoint name for logs.
    fn name(&self) -> &str;
}
