//! Revoked-tokens table — presence of a row means the token is revoked.
//!
//! Tokens are keyed by a sha256 digest so the raw bearer token never lands in
//! the store. The fail-open policy on lookup errors lives in the caller
//! (`auth::token`), where the trade-off is documented.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::{KeyValue, StoreError};

/// Typed repository over the RevokedTokens table.
#[derive(Clone)]
pub struct RevokedTokensRepo {
    store: Arc<dyn KeyValue>,
    table: String,
}

impl std::fmt::Debug for RevokedTokensRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevokedTokensRepo")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl RevokedTokensRepo {
    /// Create a repository bound to `table`.
    pub fn new(store: Arc<dyn KeyValue>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Revocation key for a bearer token: lowercase hex of its sha256 digest.
    pub fn token_id(token: &str) -> String {
        let hash = Sha256::digest(token.as_bytes());
        hash.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether the token has a revocation row.
    pub async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        let id = Self::token_id(token);
        Ok(self.store.get(&self.table, &id).await?.is_some())
    }
}
