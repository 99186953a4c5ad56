//! Platform-settings table (read-only here).

use std::sync::Arc;

use serde_json::Value;

use super::{KeyValue, StoreError};

/// Markup applied to robot hourly rates when the setting row is absent.
pub const DEFAULT_MARKUP_PERCENT: f64 = 30.0;

const MARKUP_KEY: &str = "platformMarkupPercent";

/// Read-only repository over the PlatformSettings table.
#[derive(Clone)]
pub struct SettingsRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for SettingsRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SettingsRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Platform markup percent. Falls back to the default on a missing row
    /// or a read failure; pricing must not take the broker down.
    pub async fn markup_percent(&self) -> f64 {
        match self.store.get(&self.table, MARKUP_KEY).await {
            Ok(Some(item)) => item
                .get("settingValue")
                .or_else(|| item.get("value"))
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_MARKUP_PERCENT),
            Ok(None) => DEFAULT_MARKUP_PERCENT,
            Err(e) => {
                log::warn!("platform settings read failed, using default markup: {e}");
                DEFAULT_MARKUP_PERCENT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn missing_row_uses_default() {
        let repo = SettingsRepo::new(Arc::new(MemoryStore::new()), "settings");
        assert_eq!(repo.markup_percent().await, DEFAULT_MARKUP_PERCENT);
    }

    #[tokio::test]
    async fn stored_value_overrides_default() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                "settings",
                "platformMarkupPercent",
                json!({"settingKey": "platformMarkupPercent", "settingValue": 15.0}),
            )
            .await
            .unwrap();
        let repo = SettingsRepo::new(Arc::clone(&store) as Arc<dyn KeyValue>, "settings");
        assert_eq!(repo.markup_percent().await, 15.0);
    }
}
