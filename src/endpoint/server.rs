//! TCP communication endpoint.

use crate::coordinator::config::ClusterAddress;
use crate::core::{Error, Result};
use crate::endpoint::protocol::{read_frame, write_frame, Request, RequestBody, Response};
use crate::endpoint::CommunicationEndpoint;
use crate::federated::FederationState;
use crate::runtime::ShutdownSignal;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Largest sample count a client may report for one update.
pub const MAX_SAMPLE_COUNT: u64 = 1 << 40;

/// Endpoint accepting client updates over TCP.
pub struct TcpEndpoint {
    state: FederationState,
    accepts_updates: bool,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl TcpEndpoint {
    /// Create an endpoint feeding `state`.
    pub fn new(state: FederationState) -> Self {
        let (bound, _) = watch::channel(None);
        Self {
            state,
            accepts_updates: true,
            bound,
        }
    }

    /// Whether `SubmitUpdate` is queued for a server aggregator.
    ///
    /// Without one, submissions are refused instead of piling up.
    pub fn accepting_updates(mut self, accept: bool) -> Self {
        self.accepts_updates = accept;
        self
    }

    /// Whether submissions are queued.
    pub fn accepts_updates(&self) -> bool {
        self.accepts_updates
    }

    /// Address currently listened on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Watch the listening address (`None` while not listening).
    pub fn listening(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.bound.subscribe()
    }
}

#[async_trait]
impl CommunicationEndpoint for TcpEndpoint {
    async fn serve(&self, address: &ClusterAddress, mut shutdown: ShutdownSignal) -> Result<()> {
        let addr = address.resolve().await?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            let err = Error::EndpointStart {
                address: address.authority(),
                reason: e.to_string(),
            };
            error!(address = %address.authority(), error = %e, "Communication endpoint failed to bind");
            err
        })?;

        let local = listener.local_addr()?;
        self.bound.send_replace(Some(local));
        info!(address = %local, api_version = %address.api_version, "Communication endpoint listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Client connected");
                        let state = self.state.clone();
                        let version = address.api_version.clone();
                        let accepts_updates = self.accepts_updates;
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &state, &version, accepts_updates).await {
                                warn!(peer = %peer, error = %e, "Client connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        connections.abort_all();
        self.bound.send_replace(None);
        info!(address = %local, "Communication endpoint stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: &FederationState,
    api_version: &str,
    accepts_updates: bool,
) -> Result<()> {
    while let Some(request) = read_frame::<_, Request>(&mut stream).await? {
        let response = dispatch(request, state, api_version, accepts_updates);
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

/// Apply one request to the shared state.
///
/// Updates are refused when `accepts_updates` is false or when they could not
/// be aggregated (no weights, sample count above [`MAX_SAMPLE_COUNT`]).
pub fn dispatch(request: Request, state: &FederationState, api_version: &str, accepts_updates: bool) -> Response {
    if request.api_version != api_version {
        let err = Error::ProtocolVersionMismatch {
            expected: api_version.to_string(),
            got: request.api_version,
        };
        return Response::Error {
            message: err.to_string(),
        };
    }

    match request.body {
        RequestBody::Ping => Response::Pong {
            api_version: api_version.to_string(),
        },
        RequestBody::SubmitUpdate(update) => {
            if !accepts_updates {
                return Response::Error {
                    message: "no server aggregator, updates are not accepted".to_string(),
                };
            }
            if update.weights.is_empty() {
                return Response::Error {
                    message: format!("empty update from client {}", update.client_id),
                };
            }
            if update.sample_count > MAX_SAMPLE_COUNT {
                warn!(client = %update.client_id, samples = update.sample_count, "Rejecting implausible sample count");
                return Response::Error {
                    message: format!(
                        "sample count {} from client {} exceeds {}",
                        update.sample_count, update.client_id, MAX_SAMPLE_COUNT
                    ),
                };
            }
            debug!(job = %update.job_id, client = %update.client_id, "Update received");
            let pending = state.updates.submit(update);
            Response::Accepted { pending }
        }
        RequestBody::FetchModel { job_id } => Response::Model(state.models.latest(&job_id)),
    }
}
