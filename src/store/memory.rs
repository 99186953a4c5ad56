//! In-process key-value backend.
//!
//! Used for local development and the test suite. Honors the same [`KeyValue`]
//! contract the durable collaborator implements, including guarded writes and
//! field-equality index queries (indexes are satisfied by scanning — fine at
//! dev scale).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{KeyValue, PutGuard, StoreError};

/// HashMap-backed [`KeyValue`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValue for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, table: &str, key: &str, item: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), item);
        Ok(())
    }

    async fn put_if(
        &self,
        table: &str,
        key: &str,
        item: Value,
        guard: PutGuard,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        let passes = match &guard {
            PutGuard::FieldAbsentOrEquals { field, value } => match rows.get(key) {
                None => true,
                Some(existing) => match existing.get(field) {
                    None | Some(Value::Null) => true,
                    Some(v) => v.as_str() == Some(value.as_str()),
                },
            },
        };
        if passes {
            rows.insert(key.to_string(), item);
        }
        Ok(passes)
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn query_index(
        &self,
        table: &str,
        _index: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|item| item.get(field).and_then(Value::as_str) == Some(value))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryStore::new();
        store
            .put("t", "k", json!({"a": 1}))
            .await
            .expect("put succeeds");
        assert_eq!(store.get("t", "k").await.unwrap(), Some(json!({"a": 1})));
        store.delete("t", "k").await.unwrap();
        assert_eq!(store.get("t", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_missing_key_is_ok() {
        let store = MemoryStore::new();
        store.delete("t", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn guarded_put_claims_fresh_and_same_owner_rows() {
        let store = MemoryStore::new();
        let guard = |who: &str| PutGuard::FieldAbsentOrEquals {
            field: "ownerUserId".to_string(),
            value: who.to_string(),
        };

        // Fresh row: anyone can claim.
        assert!(store
            .put_if("t", "r-1", json!({"ownerUserId": "alice"}), guard("alice"))
            .await
            .unwrap());

        // Same owner: allowed.
        assert!(store
            .put_if("t", "r-1", json!({"ownerUserId": "alice"}), guard("alice"))
            .await
            .unwrap());

        // Different owner: rejected, row untouched.
        assert!(!store
            .put_if("t", "r-1", json!({"ownerUserId": "bob"}), guard("bob"))
            .await
            .unwrap());
        let row = store.get("t", "r-1").await.unwrap().unwrap();
        assert_eq!(row["ownerUserId"], "alice");
    }

    #[tokio::test]
    async fn guarded_put_treats_null_field_as_absent() {
        let store = MemoryStore::new();
        store
            .put("t", "r-1", json!({"ownerUserId": null}))
            .await
            .unwrap();
        let claimed = store
            .put_if(
                "t",
                "r-1",
                json!({"ownerUserId": "alice"}),
                PutGuard::FieldAbsentOrEquals {
                    field: "ownerUserId".to_string(),
                    value: "alice".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(claimed);
    }

    #[tokio::test]
    async fn index_query_filters_by_field_equality() {
        let store = MemoryStore::new();
        store
            .put("t", "a", json!({"monitoringRobotId": "r-1"}))
            .await
            .unwrap();
        store
            .put("t", "b", json!({"monitoringRobotId": "r-2"}))
            .await
            .unwrap();
        store.put("t", "c", json!({"other": true})).await.unwrap();

        let hits = store
            .query_index("t", "monitoringRobotIdIndex", "monitoringRobotId", "r-1")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["monitoringRobotId"], "r-1");
    }
}
