//! Inbound message normalizer.
//!
//! Collapses the three historical wire dialects into one internal form:
//!
//! ```text
//! legacy flat      {type: "offer", to: "robot-7", from: "C1", sdp: "..."}
//! legacy explicit  {type: "offer", robotId: "r-1", target?, clientConnectionId?, payload?}
//! modulr-v0        {type: "signalling.offer", version: "0.0", id, timestamp,
//!                   payload: {robotId?, connectionId?, sdp?, sdpType?, ...}}
//! ```
//!
//! The normalizer is pure: it never touches I/O, and anything it cannot
//! place stays `None` for the dispatcher to reject.

// Rust guideline compliant 2026-02

use serde_json::{Map, Value};

/// Internal message type after dialect collapse.
///
/// Legacy tokens are mapped (`candidate` folds into `ice-candidate`);
/// versioned tokens pass through verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Register,
    Takeover,
    Monitor,
    Ping,
    Pong,
    Ready,
    Offer,
    Answer,
    IceCandidate,
    V0Offer,
    V0Answer,
    V0IceCandidate,
    V0Connected,
    V0Disconnected,
    V0Capabilities,
    V0Error,
    AgentPing,
    AgentPong,
}

impl MessageKind {
    /// Parse a wire type token, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "register" => Some(Self::Register),
            "takeover" => Some(Self::Takeover),
            "monitor" => Some(Self::Monitor),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "ready" => Some(Self::Ready),
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" | "candidate" => Some(Self::IceCandidate),
            "signalling.offer" => Some(Self::V0Offer),
            "signalling.answer" => Some(Self::V0Answer),
            "signalling.ice_candidate" => Some(Self::V0IceCandidate),
            "signalling.connected" => Some(Self::V0Connected),
            "signalling.disconnected" => Some(Self::V0Disconnected),
            "signalling.capabilities" => Some(Self::V0Capabilities),
            "signalling.error" => Some(Self::V0Error),
            "agent.ping" => Some(Self::AgentPing),
            "agent.pong" => Some(Self::AgentPong),
            _ => None,
        }
    }

    /// True for `signalling.*` / `agent.*` tokens.
    pub fn is_versioned(self) -> bool {
        matches!(
            self,
            Self::V0Offer
                | Self::V0Answer
                | Self::V0IceCandidate
                | Self::V0Connected
                | Self::V0Disconnected
                | Self::V0Capabilities
                | Self::V0Error
                | Self::AgentPing
                | Self::AgentPong
        )
    }

    /// True for legacy `offer`/`answer`/`ice-candidate`.
    pub fn is_legacy_signal(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }

    /// Semantic signaling kind if this message rides the relay.
    pub fn signal_kind(self) -> Option<SignalKind> {
        match self {
            Self::Offer | Self::V0Offer => Some(SignalKind::Offer),
            Self::Answer | Self::V0Answer => Some(SignalKind::Answer),
            Self::IceCandidate | Self::V0IceCandidate => Some(SignalKind::IceCandidate),
            Self::V0Connected => Some(SignalKind::Connected),
            Self::V0Disconnected => Some(SignalKind::Disconnected),
            Self::V0Error => Some(SignalKind::Error),
            _ => None,
        }
    }
}

/// Semantic signaling kind, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Connected,
    Disconnected,
    Error,
}

/// Delivery target named in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Robot,
    Client,
}

impl Target {
    /// Parse a target field, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "robot" => Some(Self::Robot),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

/// One inbound frame in canonical internal form.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Mapped type, `None` for unknown tokens.
    pub kind: Option<MessageKind>,
    /// Type token exactly as it appeared on the wire.
    pub raw_type: Option<String>,
    pub robot_id: Option<String>,
    pub target: Option<Target>,
    pub client_connection_id: Option<String>,
    /// Merged payload: the `payload` object plus folded-in legacy top-level
    /// `sdp` and `candidate`.
    pub payload: Map<String, Value>,
    /// Envelope id for versioned frames (reply correlation).
    pub id: Option<String>,
    /// True when the frame used the versioned envelope dialect.
    pub versioned: bool,
    /// Original body, kept for last-chance field re-extraction in the relay.
    pub raw: Value,
}

/// Normalize an arbitrary parsed JSON object into an [`InboundMessage`].
pub fn normalize(body: &Value) -> InboundMessage {
    let raw_type = body
        .get("type")
        .and_then(Value::as_str)
        .map(String::from);
    let kind = raw_type.as_deref().and_then(MessageKind::parse);
    let versioned = raw_type
        .as_deref()
        .map(|t| {
            let t = t.to_ascii_lowercase();
            t.starts_with("signalling.") || t.starts_with("agent.")
        })
        .unwrap_or(false);

    // Payload: start with the payload object, fold in legacy top-level keys.
    let mut payload = body
        .get("payload")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for key in ["sdp", "candidate"] {
        if let Some(v) = body.get(key) {
            payload.entry(key).or_insert_with(|| v.clone());
        }
    }

    let robot_id = extract_robot_id(body, &payload, kind, versioned);
    let client_connection_id =
        extract_client_connection_id(body, &payload, kind, versioned, robot_id.as_deref());

    InboundMessage {
        kind,
        raw_type,
        robot_id,
        target: body
            .get("target")
            .and_then(Value::as_str)
            .and_then(Target::parse),
        client_connection_id,
        payload,
        id: body.get("id").and_then(Value::as_str).map(String::from),
        versioned,
        raw: body.clone(),
    }
}

fn extract_robot_id(
    body: &Value,
    payload: &Map<String, Value>,
    kind: Option<MessageKind>,
    versioned: bool,
) -> Option<String> {
    if let Some(id) = body.get("robotId").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if versioned {
        // `payload.robotId` first: `payload.connectionId` usually carries the
        // client identity and is only a fallback for envelopes that address
        // the robot that way.
        if let Some(id) = payload.get("robotId").and_then(Value::as_str) {
            return Some(id.to_string());
        }
        if let Some(id) = payload.get("connectionId").and_then(Value::as_str) {
            return Some(id.to_string());
        }
    }
    if kind == Some(MessageKind::Register) {
        if let Some(id) = body.get("from").and_then(Value::as_str) {
            return Some(id.to_string());
        }
    }
    if kind.is_some_and(MessageKind::is_legacy_signal) {
        let to = body.get("to").and_then(Value::as_str).unwrap_or("");
        let from = body.get("from").and_then(Value::as_str).unwrap_or("");
        // Prefer whichever side looks like a robot identifier, then
        // whichever is non-empty.
        for candidate in [to, from] {
            if candidate.starts_with("robot-") {
                return Some(candidate.to_string());
            }
        }
        for candidate in [to, from] {
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn extract_client_connection_id(
    body: &Value,
    payload: &Map<String, Value>,
    kind: Option<MessageKind>,
    versioned: bool,
    robot_id: Option<&str>,
) -> Option<String> {
    if let Some(id) = body.get("clientConnectionId").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if versioned {
        if let Some(id) = payload.get("connectionId").and_then(Value::as_str) {
            if Some(id) != robot_id {
                return Some(id.to_string());
            }
        }
        return None;
    }
    if kind.is_some_and(MessageKind::is_legacy_signal) {
        // Robot-to-client direction: `from` names the robot, so `to` is the
        // client connection id.
        let from = body.get("from").and_then(Value::as_str);
        if from.is_some() && from == robot_id {
            if let Some(to) = body.get("to").and_then(Value::as_str) {
                return Some(to.to_string());
            }
        }
    }
    None
}
