//! Client side of the endpoint protocol.

use crate::core::{Error, Result};
use crate::endpoint::protocol::{read_frame, write_frame, Request, RequestBody, Response};
use crate::federated::{ClientUpdate, GlobalModel};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// A connection to a communication endpoint.
pub struct EndpointClient {
    stream: TcpStream,
    api_version: String,
}

impl EndpointClient {
    /// Connect to `addr`, speaking `api_version`.
    pub async fn connect(addr: SocketAddr, api_version: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            api_version: api_version.to_string(),
        })
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, body: RequestBody) -> Result<Response> {
        write_frame(&mut self.stream, &Request::new(&self.api_version, body)).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| Error::Protocol("connection closed before response".to_string()))
    }

    /// Liveness check. Returns the server's API version.
    pub async fn ping(&mut self) -> Result<String> {
        match self.call(RequestBody::Ping).await? {
            Response::Pong { api_version } => Ok(api_version),
            other => Err(unexpected(other)),
        }
    }

    /// Submit an update. Returns the number pending for its job.
    pub async fn submit_update(&mut self, update: ClientUpdate) -> Result<usize> {
        match self.call(RequestBody::SubmitUpdate(update)).await? {
            Response::Accepted { pending } => Ok(pending),
            other => Err(unexpected(other)),
        }
    }

    /// Latest global model for a job.
    pub async fn fetch_model(&mut self, job_id: &str) -> Result<Option<GlobalModel>> {
        let body = RequestBody::FetchModel {
            job_id: job_id.to_string(),
        };
        match self.call(body).await? {
            Response::Model(model) => Ok(model),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> Error {
    match response {
        Response::Error { message } => Error::Protocol(message),
        other => Error::Protocol(format!("unexpected response: {:?}", other)),
    }
}
