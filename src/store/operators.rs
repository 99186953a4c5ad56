//! Robot-operator delegation table.
//!
//! A row for `(robotId, userId)` grants that user operator rights on the
//! robot. The collaborator keys rows by a partition+sort pair; on the
//! [`KeyValue`] seam the pair is flattened into one `robotId#userId` key.

use std::sync::Arc;

use super::{KeyValue, StoreError};

/// Typed repository over the RobotOperators table.
#[derive(Clone)]
pub struct OperatorsRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for OperatorsRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorsRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl OperatorsRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    fn key(robot_id: &str, user_id: &str) -> String {
        format!("{robot_id}#{user_id}")
    }

    /// Whether a delegation row exists for `(robot_id, user_id)`.
    pub async fn is_delegate(&self, robot_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let key = Self::key(robot_id, user_id);
        Ok(self.store.get(&self.table, &key).await?.is_some())
    }
}
