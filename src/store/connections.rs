//! Connections table — one row per live transport connection.
//!
//! Rows are created on a successful `$connect` handshake, mutated when a
//! connection subscribes as a monitor or speaks a versioned frame for the
//! first time, and deleted on `$disconnect`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{now_ms, KeyValue, StoreError};

/// Secondary index over `monitoringRobotId`.
const MONITOR_INDEX: &str = "monitoringRobotIdIndex";

/// Wire protocol spoken by a connected peer.
///
/// Every connection starts as `legacy` and is promoted to `modulr-v0` the
/// first time a versioned frame arrives on it. Outbound frames are formatted
/// per this field so heterogeneous peers interoperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protocol {
    /// Flat frames: `{type, to, from, sdp?, candidate?}`.
    #[default]
    #[serde(rename = "legacy")]
    Legacy,
    /// Versioned envelopes: `signalling.*` / `agent.*`.
    #[serde(rename = "modulr-v0")]
    ModulrV0,
}

/// Connection role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Ordinary client or robot-agent connection.
    #[default]
    Client,
    /// Read-only observer of one robot's frames.
    Monitor,
}

/// One live transport connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Transport-assigned opaque connection id (primary key).
    pub connection_id: String,
    /// Authenticated user id from the token claims.
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// Comma-joined group names from the token claims.
    #[serde(default)]
    pub groups: String,
    #[serde(default)]
    pub kind: ConnectionKind,
    /// Set only when `kind` is `monitor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_robot_id: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    /// Last-activity timestamp, ms epoch. Refreshed by keepalives.
    #[serde(default)]
    pub ts: i64,
}

impl ConnectionRecord {
    /// Groups as a vector, dropping empty segments.
    pub fn groups_vec(&self) -> Vec<String> {
        self.groups
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Typed repository over the Connections table.
#[derive(Clone)]
pub struct ConnectionsRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for ConnectionsRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionsRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl ConnectionsRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Read one connection row.
    pub async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let item = self.store.get(&self.table, connection_id).await?;
        match item {
            None => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("bad connection row: {e}"))),
        }
    }

    /// Write a connection row.
    pub async fn put(&self, rec: &ConnectionRecord) -> Result<(), StoreError> {
        let item = serde_json::to_value(rec)
            .map_err(|e| StoreError::Backend(format!("encode connection row: {e}")))?;
        self.store.put(&self.table, &rec.connection_id, item).await
    }

    /// Delete a connection row.
    pub async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        self.store.delete(&self.table, connection_id).await
    }

    /// Refresh the keepalive timestamp. A missing row is ignored.
    pub async fn touch(&self, connection_id: &str) -> Result<(), StoreError> {
        if let Some(mut rec) = self.get(connection_id).await? {
            rec.ts = now_ms();
            self.put(&rec).await?;
        }
        Ok(())
    }

    /// Promote the connection to the versioned protocol.
    pub async fn promote_protocol(&self, connection_id: &str) -> Result<(), StoreError> {
        if let Some(mut rec) = self.get(connection_id).await? {
            if rec.protocol != Protocol::ModulrV0 {
                rec.protocol = Protocol::ModulrV0;
                self.put(&rec).await?;
            }
        }
        Ok(())
    }

    /// Re-tag the connection as a monitor for `robot_id`.
    pub async fn subscribe_monitor(
        &self,
        connection_id: &str,
        robot_id: &str,
    ) -> Result<(), StoreError> {
        let Some(mut rec) = self.get(connection_id).await? else {
            return Err(StoreError::Backend(format!(
                "no connection row for {connection_id}"
            )));
        };
        rec.kind = ConnectionKind::Monitor;
        rec.monitoring_robot_id = Some(robot_id.to_string());
        rec.ts = now_ms();
        self.put(&rec).await
    }

    /// All monitors subscribed to `robot_id`.
    pub async fn monitors_for(&self, robot_id: &str) -> Result<Vec<ConnectionRecord>, StoreError> {
        let items = self
            .store
            .query_index(&self.table, MONITOR_INDEX, "monitoringRobotId", robot_id)
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    /// Protocol the peer on `connection_id` speaks. Defaults to legacy when
    /// the row is missing or unreadable; the peer still gets a frame it can
    /// at least log.
    pub async fn protocol_of(&self, connection_id: &str) -> Protocol {
        match self.get(connection_id).await {
            Ok(Some(rec)) => rec.protocol,
            Ok(None) => Protocol::Legacy,
            Err(e) => {
                log::warn!("protocol lookup for {connection_id} failed: {e}");
                Protocol::Legacy
            }
        }
    }
}
