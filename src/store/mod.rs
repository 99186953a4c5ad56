//! Typed access to the durable key-value tables.
//!
//! The durable store itself is a collaborator; the broker consumes it through
//! the [`KeyValue`] trait and the typed repositories in this module. All
//! cross-worker coordination happens through these tables — the broker keeps
//! no registry state in process memory, so any number of workers can handle
//! events for the same robots concurrently.
//!
//! Tables:
//! - Connections (one row per live transport connection)
//! - RobotPresence (robot id → current connection, owner)
//! - RevokedTokens (presence of a row ⇒ revoked)
//! - Robots (ACL + pricing, read via `robotIdIndex`)
//! - RobotOperators (delegation rows)
//! - Sessions (billing sessions, three secondary indexes)
//! - UserCredits, PlatformSettings (read-only)

// Rust guideline compliant 2026-02

mod connections;
mod credits;
mod memory;
mod operators;
mod presence;
mod revoked;
mod robots;
mod sessions;
mod settings;

pub use connections::{ConnectionKind, ConnectionRecord, ConnectionsRepo, Protocol};
pub use credits::CreditsRepo;
pub use memory::MemoryStore;
pub use operators::OperatorsRepo;
pub use presence::{PresenceRecord, PresenceRepo};
pub use revoked::RevokedTokensRepo;
pub use robots::{RobotRecord, RobotsRepo};
pub use sessions::{SessionRecord, SessionStatus, SessionsRepo};
pub use settings::{SettingsRepo, DEFAULT_MARKUP_PERCENT};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the key-value collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure: availability, throttling, or malformed items.
    #[error("store backend: {0}")]
    Backend(String),
}

/// Guard for conditional writes.
#[derive(Debug, Clone)]
pub enum PutGuard {
    /// Succeed iff the named field is absent on the existing item, or equals
    /// the given value. This is the ownership-claim condition.
    FieldAbsentOrEquals {
        /// Field to inspect on the existing item.
        field: String,
        /// Value the field must hold if present.
        value: String,
    },
}

/// The durable key-value seam.
///
/// Keys are case-sensitive opaque strings; items are JSON objects. Secondary
/// indexes are named by the collaborator and queried by field equality.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Read one item by primary key.
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write one item, replacing any existing item under the key.
    async fn put(&self, table: &str, key: &str, item: Value) -> Result<(), StoreError>;

    /// Guarded write. Returns `Ok(false)` when the guard rejected it.
    async fn put_if(
        &self,
        table: &str,
        key: &str,
        item: Value,
        guard: PutGuard,
    ) -> Result<bool, StoreError>;

    /// Delete one item by primary key. Deleting a missing key is not an error.
    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError>;

    /// Query a secondary index for items whose `field` equals `value`.
    async fn query_index(
        &self,
        table: &str,
        index: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError>;
}

/// Current wall-clock time in ms since the epoch, the timestamp format every
/// table uses.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
