//! Bearer-token verification against the user-pool key set.
//!
//! Verification order:
//! 1. Revocation lookup by sha256 digest. A matching row rejects the token.
//!    A store failure proceeds — availability over security on this check,
//!    because a revocation-store outage must not take down every handshake.
//! 2. Signature against the pool's remote JWKS, issuer, and `exp`.
//! 3. Claim projection: `sub` → user id, `cognito:groups` → groups (default
//!    empty), plus `email`, `cognito:username`, and `aud` passthrough.
//!
//! The `ALLOW_NO_TOKEN` development toggle short-circuits everything with a
//! fixed synthetic claims set. It must never be enabled in production.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::RevokedTokensRepo;

use super::Claims;

/// Raw claim shape of a pool-issued token.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    #[serde(default, rename = "cognito:groups")]
    groups: Vec<String>,
    #[serde(default)]
    email: String,
    #[serde(default, rename = "cognito:username")]
    username: String,
    #[serde(default)]
    aud: Option<Value>,
}

/// Verifies bearer tokens and projects [`Claims`].
pub struct TokenVerifier {
    issuer: String,
    jwks_url: String,
    http: reqwest::Client,
    revoked: RevokedTokensRepo,
    keys: RwLock<Option<JwkSet>>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Build a verifier for the given pool.
    pub fn new(region: &str, user_pool_id: &str, revoked: RevokedTokensRepo) -> Self {
        let issuer = format!("https://cognito-idp.{region}.amazonaws.com/{user_pool_id}");
        let jwks_url = format!("{issuer}/.well-known/jwks.json");
        Self {
            issuer,
            jwks_url,
            http: reqwest::Client::new(),
            revoked,
            keys: RwLock::new(None),
        }
    }

    /// The issuer this verifier accepts.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Fixed synthetic claims for development mode.
    pub fn dev_claims() -> Claims {
        Claims {
            user_id: "local-dev".to_string(),
            groups: Vec::new(),
            email: "dev@localhost".to_string(),
            username: "local-dev".to_string(),
            audience: None,
        }
    }

    /// Verify a bearer token. Returns `None` on any rejection.
    pub async fn verify(&self, token: &str) -> Option<Claims> {
        match self.revoked.is_revoked(token).await {
            Ok(true) => {
                log::warn!("rejected revoked token");
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                // Availability over security: proceed to signature checks.
                log::warn!("revocation lookup failed, continuing: {e}");
            }
        }

        let header = match decode_header(token) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("unparseable token header: {e}");
                return None;
            }
        };
        let kid = header.kid?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let data = match decode::<RawClaims>(token, &key, &validation) {
            Ok(d) => d,
            Err(e) => {
                log::info!("token rejected: {e}");
                return None;
            }
        };

        let raw = data.claims;
        Some(Claims {
            user_id: raw.sub,
            groups: raw.groups,
            email: raw.email,
            username: raw.username,
            audience: raw
                .aud
                .as_ref()
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        if let Some(key) = self.key_from_cache(kid).await {
            return Some(key);
        }
        // Cache miss or unknown kid (key rotation): refetch once.
        if let Err(e) = self.refresh_jwks().await {
            log::warn!("JWKS fetch failed: {e}");
            return None;
        }
        self.key_from_cache(kid).await
    }

    async fn key_from_cache(&self, kid: &str) -> Option<DecodingKey> {
        let keys = self.keys.read().await;
        let set = keys.as_ref()?;
        let jwk = set.find(kid)?;
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("unusable JWK {kid}: {e}");
                None
            }
        }
    }

    async fn refresh_jwks(&self) -> Result<(), reqwest::Error> {
        let set: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        log::debug!("loaded {} JWKS keys", set.keys.len());
        *self.keys.write().await = Some(set);
        Ok(())
    }
}
