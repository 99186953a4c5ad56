//! Outbound frame sink.
//!
//! The socket transport is a collaborator consumed as a `post(connectionId,
//! bytes)` sink. A successful post is not confirmation of receipt; delivery
//! is at-most-once and a [`SinkError::Gone`] is benign evidence of a stale
//! registry row, never retried.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the frame sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The peer connection is closed.
    #[error("connection gone")]
    Gone,
    /// Anything else on the transport path.
    #[error("sink transport: {0}")]
    Transport(String),
}

/// Delivery seam to the socket transport.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Deliver `bytes` to the peer on `connection_id`.
    async fn post(&self, connection_id: &str, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Sink that POSTs frames to a remote transport management endpoint.
///
/// Used when the socket tier runs separately from the broker workers. The
/// endpoint answers 410 for closed peers, which maps to [`SinkError::Gone`].
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpSink {
    /// Build a sink for the given management endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl FrameSink for HttpSink {
    async fn post(&self, connection_id: &str, bytes: &[u8]) -> Result<(), SinkError> {
        let url = format!(
            "{}/connections/{connection_id}",
            self.endpoint.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            410 => Err(SinkError::Gone),
            status if response.status().is_success() => {
                log::trace!("posted {} bytes to {connection_id} ({status})", bytes.len());
                Ok(())
            }
            status => Err(SinkError::Transport(format!("sink returned {status}"))),
        }
    }
}
