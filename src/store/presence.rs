//! Robot-presence table — robot id → current connection and owner.
//!
//! Rows are written by `register` frames and intentionally never deleted on
//! disconnect; the relay detects stale rows by delivery failure. The
//! ownership claim is serialized by a guarded write.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{now_ms, KeyValue, PutGuard, StoreError};

/// One robot's presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Caller-supplied robot identifier (primary key).
    pub robot_id: String,
    /// User who first claimed the robot.
    pub owner_user_id: String,
    /// Socket the robot is currently on.
    pub connection_id: String,
    /// Always `online`; stale rows are detected by delivery failure.
    pub status: String,
    pub updated_at: i64,
}

/// Typed repository over the RobotPresence table.
#[derive(Clone)]
pub struct PresenceRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for PresenceRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PresenceRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Read one presence row.
    pub async fn get(&self, robot_id: &str) -> Result<Option<PresenceRecord>, StoreError> {
        let item = self.store.get(&self.table, robot_id).await?;
        match item {
            None => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("bad presence row: {e}"))),
        }
    }

    /// Claim or refresh presence under the ownership condition
    /// (`ownerUserId` absent or equal to the caller). Returns `Ok(false)`
    /// when the robot belongs to someone else.
    pub async fn claim(
        &self,
        robot_id: &str,
        owner_user_id: &str,
        connection_id: &str,
    ) -> Result<bool, StoreError> {
        let rec = Self::online(robot_id, owner_user_id, connection_id);
        let item = serde_json::to_value(&rec)
            .map_err(|e| StoreError::Backend(format!("encode presence row: {e}")))?;
        self.store
            .put_if(
                &self.table,
                robot_id,
                item,
                PutGuard::FieldAbsentOrEquals {
                    field: "ownerUserId".to_string(),
                    value: owner_user_id.to_string(),
                },
            )
            .await
    }

    /// Unconditional overwrite — admin takeover of the claim.
    pub async fn force_claim(
        &self,
        robot_id: &str,
        owner_user_id: &str,
        connection_id: &str,
    ) -> Result<(), StoreError> {
        let rec = Self::online(robot_id, owner_user_id, connection_id);
        let item = serde_json::to_value(&rec)
            .map_err(|e| StoreError::Backend(format!("encode presence row: {e}")))?;
        self.store.put(&self.table, robot_id, item).await
    }

    fn online(robot_id: &str, owner_user_id: &str, connection_id: &str) -> PresenceRecord {
        PresenceRecord {
            robot_id: robot_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            connection_id: connection_id.to_string(),
            status: "online".to_string(),
            updated_at: now_ms(),
        }
    }
}
