//! Platform-frame push helper.
//!
//! In-band frames (`welcome`, `error`, `session-locked`, ...) share the sink
//! with relayed signaling. Platform frames pass through unwrapped regardless
//! of the peer's dialect; only `error` frames are re-wrapped as
//! `signalling.error` for modulr-v0 peers.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::protocol::PROTOCOL_VERSION;
use crate::sink::{FrameSink, SinkError};
use crate::store::{ConnectionsRepo, Protocol};

/// Pushes frames to individual peers through the sink.
#[derive(Clone)]
pub struct Outbox {
    sink: Arc<dyn FrameSink>,
    connections: ConnectionsRepo,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").finish_non_exhaustive()
    }
}

impl Outbox {
    /// Build an outbox over the given sink.
    pub fn new(sink: Arc<dyn FrameSink>, connections: ConnectionsRepo) -> Self {
        Self { sink, connections }
    }

    /// Deliver a relayed frame. The caller needs the error to tell a gone
    /// peer from a transport fault, so nothing is swallowed here.
    pub async fn deliver(&self, connection_id: &str, frame: &Value) -> Result<(), SinkError> {
        self.sink.post(connection_id, &encode(frame)).await
    }

    /// Push a platform frame as-is. Delivery failures are logged and
    /// swallowed — the primary response must not depend on a secondary push.
    pub async fn send_platform(&self, connection_id: &str, frame: &Value) {
        match self.sink.post(connection_id, &encode(frame)).await {
            Ok(()) => {}
            Err(SinkError::Gone) => {
                log::warn!("peer {connection_id} gone, dropped platform frame");
            }
            Err(e) => log::warn!("platform push to {connection_id} failed: {e}"),
        }
    }

    /// Push a user-visible error in the peer's dialect.
    pub async fn send_error(
        &self,
        connection_id: &str,
        code: &str,
        message: &str,
        robot_id: Option<&str>,
    ) {
        self.send_error_fields(connection_id, code, message, robot_id, Map::new())
            .await;
    }

    /// Push a user-visible error with additional fields (e.g. credit
    /// balances on `insufficient_funds`).
    pub async fn send_error_fields(
        &self,
        connection_id: &str,
        code: &str,
        message: &str,
        robot_id: Option<&str>,
        extra: Map<String, Value>,
    ) {
        let frame = match self.connections.protocol_of(connection_id).await {
            Protocol::Legacy => {
                let mut out = Map::new();
                out.insert("type".into(), "error".into());
                out.insert("error".into(), code.into());
                out.insert("message".into(), message.into());
                if let Some(robot_id) = robot_id {
                    out.insert("robotId".into(), robot_id.into());
                }
                out.extend(extra);
                Value::Object(out)
            }
            Protocol::ModulrV0 => {
                let mut payload = Map::new();
                payload.insert("code".into(), code.into());
                payload.insert("message".into(), message.into());
                if let Some(robot_id) = robot_id {
                    payload.insert("robotId".into(), robot_id.into());
                }
                payload.extend(extra);
                json!({
                    "type": "signalling.error",
                    "version": PROTOCOL_VERSION,
                    "id": Uuid::new_v4().to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "payload": payload,
                })
            }
        };
        self.send_platform(connection_id, &frame).await;
    }
}

fn encode(frame: &Value) -> Vec<u8> {
    serde_json::to_vec(frame).expect("JSON value serialization cannot fail")
}
