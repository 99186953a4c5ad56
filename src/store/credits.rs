//! User-credits table (read-only here).
//!
//! Credit grants and ledger mutations happen elsewhere; the broker only
//! reads the balance when deciding whether a paid session may start.

use std::sync::Arc;

use serde_json::Value;

use super::{KeyValue, StoreError};

const USER_ID_INDEX: &str = "userIdIndex";

/// Read-only repository over the UserCredits table.
#[derive(Clone)]
pub struct CreditsRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for CreditsRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditsRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl CreditsRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Current balance for a user. A user with no row has zero credits.
    pub async fn credits_for(&self, user_id: &str) -> Result<f64, StoreError> {
        let items = self
            .store
            .query_index(&self.table, USER_ID_INDEX, "userId", user_id)
            .await?;
        Ok(items
            .first()
            .and_then(|item| item.get("credits"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0))
    }
}
