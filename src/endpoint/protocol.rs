//! Endpoint wire protocol.
//!
//! Every frame is a 4-byte little-endian length followed by a bincode body.
//! Requests carry the API version the client speaks.

use crate::core::{Error, Result};
use crate::federated::{ClientUpdate, GlobalModel};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A client request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// API version the client speaks
    pub api_version: String,
    /// Operation
    pub body: RequestBody,
}

impl Request {
    /// Build a request for a version.
    pub fn new(api_version: &str, body: RequestBody) -> Self {
        Self {
            api_version: api_version.to_string(),
            body,
        }
    }
}

/// Request operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Liveness check
    Ping,
    /// Queue a client update for the next round
    SubmitUpdate(ClientUpdate),
    /// Latest global model for a job
    FetchModel { job_id: String },
}

/// Server responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Reply to `Ping`
    Pong { api_version: String },
    /// Update queued
    Accepted { pending: usize },
    /// Latest model, if any has been aggregated
    Model(Option<GlobalModel>),
    /// Request rejected
    Error { message: String },
}

/// Serialize a message with its length prefix.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(Error::MessageTooLarge(body.len()));
    }
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Read one frame. `None` on a clean end of stream before a frame starts.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::MessageTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::Protocol(format!("truncated frame: {}", e)))?;
    Ok(Some(bincode::deserialize(&body)?))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let framed = encode_frame(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_through_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::new(
            "v1",
            RequestBody::SubmitUpdate(ClientUpdate::new("job", "c1", vec![0.5, 1.5], 7)),
        );

        write_frame(&mut client, &request).await.unwrap();
        let received: Request = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let frame: Option<Request> = read_frame(&mut server).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_BYTES as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge(_)));
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&16u32.to_le_bytes()).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);
        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_length_prefix() {
        let framed = encode_frame(&Response::Accepted { pending: 3 }).unwrap();
        let len = u32::from_le_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, framed.len() - 4);
    }
}
