//! WebRTC signaling broker for teleoperated robot fleets.
//!
//! Clients (browsers) and robot agents hold bidirectional socket connections
//! to the broker. The broker authenticates each connection, tracks per-robot
//! presence, enforces ownership/delegation/ACL/session-lock authorization,
//! relays SDP offers/answers and ICE candidates between exactly the intended
//! peers — translating between the legacy flat dialect and the modulr-v0
//! envelope per destination — and accounts paid session time against credit
//! balances. No media is ever carried; only signaling control frames.
//!
//! The broker is stateless per event: every socket event is an independent
//! transaction against the durable tables behind [`store::KeyValue`], and
//! outbound delivery goes through the [`sink::FrameSink`] seam.

// Library modules
pub mod auth;
pub mod authz;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod monitor;
pub mod outbox;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use auth::{AuthResolver, Claims, TokenVerifier};
pub use config::Config;
pub use dispatch::Broker;
pub use error::BrokerError;
pub use event::{EventResponse, RouteKey, SocketEvent};
pub use sink::{FrameSink, HttpSink, SinkError};
pub use store::{KeyValue, MemoryStore, StoreError};
