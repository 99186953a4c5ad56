//! Sessions table — billing sessions with three secondary indexes.
//!
//! Indexed by user, by robot, and by client connection so the lifecycle code
//! can answer "does this user already have a session", "who holds the lock on
//! this robot", and "which sessions die with this socket" with one query
//! each.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{now_ms, KeyValue, StoreError};

const USER_ID_INDEX: &str = "userIdIndex";
const ROBOT_ID_INDEX: &str = "robotIdIndex";
const CONNECTION_ID_INDEX: &str = "connectionIdIndex";

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One billing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Generated id (primary key).
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    pub robot_id: String,
    /// Client connection the session is billed against.
    pub connection_id: String,
    pub status: SessionStatus,
    /// Session start, ms epoch.
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
}

/// Typed repository over the Sessions table.
#[derive(Clone)]
pub struct SessionsRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for SessionsRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionsRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SessionsRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Write a session row.
    pub async fn put(&self, rec: &SessionRecord) -> Result<(), StoreError> {
        let item = serde_json::to_value(rec)
            .map_err(|e| StoreError::Backend(format!("encode session row: {e}")))?;
        self.store.put(&self.table, &rec.id, item).await
    }

    /// All `active` sessions for a user.
    pub async fn active_by_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        self.query_active(USER_ID_INDEX, "userId", user_id).await
    }

    /// The `active` session holding the lock on a robot, if any.
    pub async fn active_for_robot(
        &self,
        robot_id: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .query_active(ROBOT_ID_INDEX, "robotId", robot_id)
            .await?
            .into_iter()
            .next())
    }

    /// All `active` sessions bound to a client connection.
    pub async fn active_by_connection(
        &self,
        connection_id: &str,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        self.query_active(CONNECTION_ID_INDEX, "connectionId", connection_id)
            .await
    }

    /// Mark a session completed, stamping end time and duration.
    pub async fn complete(&self, mut rec: SessionRecord) -> Result<(), StoreError> {
        let ended = now_ms();
        rec.status = SessionStatus::Completed;
        rec.ended_at = Some(ended);
        rec.duration_seconds = Some(((ended - rec.started_at) / 1000).max(0));
        self.put(&rec).await
    }

    async fn query_active(
        &self,
        index: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let items = self.store.query_index(&self.table, index, field, value).await?;
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<SessionRecord>(v).ok())
            .filter(|s| s.status == SessionStatus::Active)
            .collect())
    }
}
