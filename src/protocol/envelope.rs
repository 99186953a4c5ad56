//! Outbound envelope formatting.
//!
//! Every outbound frame is written in the destination peer's dialect:
//!
//! ```text
//! legacy     {type, to, from, sdp?, candidate?, ...payload keys}
//!            (ice candidates go out as "candidate", never "ice-candidate")
//! modulr-v0  {type: "signalling.<kind>", version, id, timestamp,
//!             payload: {sdp?, sdpType?, candidate?, sdpMid?,
//!                       sdpMLineIndex?, connectionId?}}
//! ```
//!
//! Platform frames (`welcome`, `session-created`, `session-locked`,
//! `monitor-confirmed`, `admin-takeover`) pass through unwrapped; only
//! `error` frames are re-wrapped for versioned peers (see `outbox`).

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::store::Protocol;

use super::normalize::SignalKind;

/// Envelope version stamped on frames the broker originates.
pub const PROTOCOL_VERSION: &str = "0.0";

/// Protocol versions the broker accepts.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["0.0", "0.1"];

/// Payload keys a modulr-v0 signaling envelope may carry.
const V0_PAYLOAD_KEYS: [&str; 5] = ["sdp", "sdpType", "candidate", "sdpMid", "sdpMLineIndex"];

/// A relayed signaling frame, resolved and ready for per-peer formatting.
#[derive(Debug)]
pub struct SignalFrame<'a> {
    pub kind: SignalKind,
    pub robot_id: &'a str,
    /// Destination identity for the legacy `to` field.
    pub to: &'a str,
    /// Source identity for the legacy `from` field: the client connection id
    /// for client→robot, the robot id for robot→client.
    pub from: &'a str,
    /// Client connection id carried as modulr-v0 `payload.connectionId`.
    pub connection_id: Option<&'a str>,
    /// Merged payload from the normalizer.
    pub payload: &'a Map<String, Value>,
}

impl SignalKind {
    /// Legacy wire token.
    pub fn legacy_token(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "candidate",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Versioned wire token.
    pub fn v0_token(self) -> &'static str {
        match self {
            Self::Offer => "signalling.offer",
            Self::Answer => "signalling.answer",
            Self::IceCandidate => "signalling.ice_candidate",
            Self::Connected => "signalling.connected",
            Self::Disconnected => "signalling.disconnected",
            Self::Error => "signalling.error",
        }
    }

    fn sdp_type(self) -> Option<&'static str> {
        match self {
            Self::Offer => Some("offer"),
            Self::Answer => Some("answer"),
            _ => None,
        }
    }
}

/// Format a relayed signaling frame for one destination peer.
pub fn format_signal(protocol: Protocol, frame: &SignalFrame<'_>) -> Value {
    match protocol {
        Protocol::Legacy => {
            let mut out = Map::new();
            out.insert("type".into(), frame.kind.legacy_token().into());
            out.insert("to".into(), frame.to.into());
            out.insert("from".into(), frame.from.into());
            // Payload keys pass through at top level; addressing fields are
            // already represented by to/from.
            for (k, v) in frame.payload {
                if k == "connectionId" || k == "robotId" {
                    continue;
                }
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
            Value::Object(out)
        }
        Protocol::ModulrV0 => {
            let mut payload = Map::new();
            for key in V0_PAYLOAD_KEYS {
                if let Some(v) = frame.payload.get(key) {
                    payload.insert(key.into(), v.clone());
                }
            }
            if payload.contains_key("sdp") && !payload.contains_key("sdpType") {
                if let Some(sdp_type) = frame.kind.sdp_type() {
                    payload.insert("sdpType".into(), sdp_type.into());
                }
            }
            if let Some(conn) = frame.connection_id {
                payload.insert("connectionId".into(), conn.into());
            }
            json!({
                "type": frame.kind.v0_token(),
                "version": PROTOCOL_VERSION,
                "id": Uuid::new_v4().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "payload": payload,
            })
        }
    }
}

/// The `welcome` platform frame sent on the handshake and on `ready`.
pub fn welcome_frame(connection_id: &str) -> Value {
    json!({"type": "welcome", "connectionId": connection_id})
}

/// Keepalive reply in the peer's dialect.
///
/// Legacy peers get a bare `pong`; versioned peers get an `agent.pong`
/// correlated to the request id.
pub fn pong_reply(versioned: bool, request_id: Option<&str>) -> Value {
    if !versioned {
        return json!({"type": "pong"});
    }
    let base = request_id
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    json!({
        "type": "agent.pong",
        "version": PROTOCOL_VERSION,
        "id": format!("{base}-pong"),
        "correlationId": base,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// Reply to a `signalling.capabilities` request.
pub fn capabilities_reply(request_id: Option<&str>) -> Value {
    let mut reply = json!({
        "type": "signalling.capabilities",
        "version": PROTOCOL_VERSION,
        "id": Uuid::new_v4().to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "payload": {"supportedVersions": SUPPORTED_VERSIONS},
    });
    if let Some(id) = request_id {
        reply["correlationId"] = id.into();
    }
    reply
}
