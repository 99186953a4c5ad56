//! Transport event model.
//!
//! Every incoming socket event (open, frame, close) reaches the dispatcher as
//! a [`SocketEvent`] and is answered with an HTTP-style [`EventResponse`].
//! The broker is stateless per event: each one is an independent transaction
//! against the durable tables.

use std::collections::HashMap;

/// Route key assigned by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKey {
    /// Socket open handshake (`$connect`).
    Connect,
    /// Socket close (`$disconnect`).
    Disconnect,
    /// Any data frame (`$default`).
    Default,
}

/// One transport event.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    /// Which lifecycle route produced this event.
    pub route_key: RouteKey,
    /// Transport-assigned opaque connection id.
    pub connection_id: String,
    /// Query-string parameters from the upgrade URL (`token=...` on connect).
    pub query: HashMap<String, String>,
    /// Raw frame body for `$default` events.
    pub body: Option<String>,
}

impl SocketEvent {
    /// A `$connect` handshake event.
    pub fn connect(connection_id: impl Into<String>, query: HashMap<String, String>) -> Self {
        Self {
            route_key: RouteKey::Connect,
            connection_id: connection_id.into(),
            query,
            body: None,
        }
    }

    /// A `$disconnect` event.
    pub fn disconnect(connection_id: impl Into<String>) -> Self {
        Self {
            route_key: RouteKey::Disconnect,
            connection_id: connection_id.into(),
            query: HashMap::new(),
            body: None,
        }
    }

    /// A `$default` data-frame event.
    pub fn frame(connection_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            route_key: RouteKey::Default,
            connection_id: connection_id.into(),
            query: HashMap::new(),
            body: Some(body.into()),
        }
    }
}

/// HTTP-style response returned to the transport layer.
///
/// On the handshake the status decides whether the upgrade completes; on data
/// frames it is advisory (user-visible errors are additionally pushed in-band
/// because clients cannot rely on status codes crossing the socket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventResponse {
    /// HTTP-style status code (200/400/401/403/404/409/423/500).
    pub status: u16,
    /// Human-readable body.
    pub body: String,
}

impl EventResponse {
    /// A 200 response.
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: "OK".to_string(),
        }
    }

    /// A response with an explicit status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 400 response.
    pub fn bad_request(body: impl Into<String>) -> Self {
        Self::new(400, body)
    }
}
