//! Claims resolution for socket events.
//!
//! Two paths produce a [`Claims`]:
//! - *Fast path*: synthesize claims from the Connections row. Preferred on
//!   every per-frame event; no token work at all.
//! - *Slow path*: verify the bearer token. Used on the handshake, or as a
//!   fallback when the connection row is missing.

use std::sync::Arc;

use crate::store::ConnectionsRepo;

use super::{Claims, TokenVerifier};

/// Resolves the identity behind a connection or a frame.
pub struct AuthResolver {
    connections: ConnectionsRepo,
    verifier: Arc<TokenVerifier>,
    /// Development toggle: replaces both paths with synthetic claims.
    dev_mode: bool,
}

impl std::fmt::Debug for AuthResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResolver")
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

impl AuthResolver {
    /// Build a resolver.
    pub fn new(connections: ConnectionsRepo, verifier: Arc<TokenVerifier>, dev_mode: bool) -> Self {
        Self {
            connections,
            verifier,
            dev_mode,
        }
    }

    /// Handshake path: bearer token from the upgrade query string.
    pub async fn claims_for_handshake(&self, token: Option<&str>) -> Option<Claims> {
        if self.dev_mode {
            return Some(TokenVerifier::dev_claims());
        }
        self.verifier.verify(token?).await
    }

    /// Per-frame path: connection row first, token fallback.
    pub async fn claims_for_frame(
        &self,
        connection_id: &str,
        token: Option<&str>,
    ) -> Option<Claims> {
        if self.dev_mode {
            return Some(TokenVerifier::dev_claims());
        }
        if let Some(claims) = self.claims_for_connection(connection_id).await {
            return Some(claims);
        }
        self.verifier.verify(token?).await
    }

    /// Fast path: connection-backed claims.
    async fn claims_for_connection(&self, connection_id: &str) -> Option<Claims> {
        match self.connections.get(connection_id).await {
            Ok(Some(rec)) if !rec.user_id.is_empty() => Some(Claims {
                user_id: rec.user_id.clone(),
                groups: rec.groups_vec(),
                email: rec.email.clone(),
                username: rec.username.clone(),
                audience: None,
            }),
            Ok(_) => None,
            Err(e) => {
                log::warn!("connection lookup for {connection_id} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        ConnectionKind, ConnectionRecord, MemoryStore, Protocol, RevokedTokensRepo,
    };

    fn resolver(dev_mode: bool) -> (AuthResolver, ConnectionsRepo) {
        let store = Arc::new(MemoryStore::new());
        let connections =
            ConnectionsRepo::new(Arc::clone(&store) as Arc<dyn crate::store::KeyValue>, "conn");
        let revoked =
            RevokedTokensRepo::new(Arc::clone(&store) as Arc<dyn crate::store::KeyValue>, "rev");
        let verifier = Arc::new(TokenVerifier::new("eu-west-1", "pool-1", revoked));
        (
            AuthResolver::new(connections.clone(), verifier, dev_mode),
            connections,
        )
    }

    #[tokio::test]
    async fn frame_claims_come_from_connection_row() {
        let (resolver, connections) = resolver(false);
        connections
            .put(&ConnectionRecord {
                connection_id: "C1".to_string(),
                user_id: "alice".to_string(),
                username: "alice".to_string(),
                email: "alice@x".to_string(),
                groups: "ADMINS".to_string(),
                kind: ConnectionKind::Client,
                monitoring_robot_id: None,
                protocol: Protocol::Legacy,
                ts: 0,
            })
            .await
            .unwrap();

        let claims = resolver.claims_for_frame("C1", None).await.unwrap();
        assert_eq!(claims.user_id, "alice");
        assert_eq!(claims.groups, vec!["ADMINS"]);
    }

    #[tokio::test]
    async fn missing_row_and_token_is_unauthorized() {
        let (resolver, _) = resolver(false);
        assert!(resolver.claims_for_frame("ghost", None).await.is_none());
        assert!(resolver.claims_for_handshake(None).await.is_none());
    }

    #[tokio::test]
    async fn dev_mode_replaces_both_paths() {
        let (resolver, _) = resolver(true);
        let a = resolver.claims_for_handshake(None).await.unwrap();
        let b = resolver.claims_for_frame("ghost", None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.user_id, "local-dev");
    }
}
