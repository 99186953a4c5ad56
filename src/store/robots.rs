//! Robots table — the ACL + pricing view.
//!
//! Read through `robotIdIndex`. A robot with no row at all is a legacy
//! device that predates the table; access decisions treat it as open.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{KeyValue, StoreError};

const ROBOT_ID_INDEX: &str = "robotIdIndex";

/// ACL and pricing fields of a robot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotRecord {
    pub robot_id: String,
    /// Lowercased identifiers permitted to signal the robot.
    /// Absent or empty ⇒ open access.
    #[serde(default)]
    pub allowed_users: Option<Vec<String>>,
    /// Credits per hour of session time. Zero ⇒ free.
    #[serde(default)]
    pub hourly_rate_credits: f64,
}

/// Typed repository over the Robots table.
#[derive(Clone)]
pub struct RobotsRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for RobotsRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl RobotsRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Look up a robot row by robot id.
    pub async fn by_robot_id(&self, robot_id: &str) -> Result<Option<RobotRecord>, StoreError> {
        let items = self
            .store
            .query_index(&self.table, ROBOT_ID_INDEX, "robotId", robot_id)
            .await?;
        Ok(items
            .into_iter()
            .next()
            .and_then(|v| serde_json::from_value(v).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn missing_row_reads_as_none() {
        let repo = RobotsRepo::new(Arc::new(MemoryStore::new()), "robots");
        assert!(repo.by_robot_id("r-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acl_and_rate_fields_deserialize() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                "robots",
                "row-1",
                json!({
                    "robotId": "r-1",
                    "allowedUsers": ["alice@x"],
                    "hourlyRateCredits": 12.5
                }),
            )
            .await
            .unwrap();
        let repo = RobotsRepo::new(Arc::clone(&store) as Arc<dyn KeyValue>, "robots");
        let rec = repo.by_robot_id("r-1").await.unwrap().unwrap();
        assert_eq!(rec.allowed_users.as_deref(), Some(&["alice@x".to_string()][..]));
        assert!((rec.hourly_rate_credits - 12.5).abs() < f64::EPSILON);
    }
}
