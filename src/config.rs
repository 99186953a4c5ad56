//! Broker configuration.
//!
//! All configuration comes from the environment. Table names point at the
//! durable key-value collaborator; the optional tables disable the features
//! that depend on them when absent (no sessions table means no session locks
//! and no billing sessions).

use anyhow::{Context, Result};

/// Configuration for the signaling broker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connections table name.
    pub connections_table: String,
    /// Robot-presence table name.
    pub robot_presence_table: String,
    /// Revoked-tokens table name.
    pub revoked_tokens_table: String,
    /// Robot-operator delegation table name.
    pub robot_operators_table: String,
    /// Robots (ACL + pricing) table name.
    pub robots_table: String,
    /// Sessions table name. Absent disables session locks and billing.
    pub sessions_table: Option<String>,
    /// User-credits table name (read-only). Absent skips balance checks.
    pub user_credits_table: Option<String>,
    /// Platform-settings table name (read-only).
    pub platform_settings_table: Option<String>,
    /// Remote sink management endpoint. Absent selects the embedded local sink.
    pub sink_endpoint: Option<String>,
    /// User-pool id for token verification.
    pub user_pool_id: String,
    /// Region of the user pool.
    pub region: String,
    /// Development-only toggle: replaces token verification with fixed
    /// synthetic claims. Must never be set in production.
    pub allow_no_token: bool,
    /// Opt-in legacy behavior: a `target=client` frame with no resolvable
    /// client connection id emits a monitor copy and returns 200 instead of
    /// failing with 400.
    pub lenient_client_target: bool,
    /// Listen address for the embedded WebSocket server.
    pub listen_addr: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            connections_table: required("CONNECTIONS_TABLE")?,
            robot_presence_table: required("ROBOT_PRESENCE_TABLE")?,
            revoked_tokens_table: required("REVOKED_TOKENS_TABLE")?,
            robot_operators_table: required("ROBOT_OPERATORS_TABLE")?,
            robots_table: required("ROBOTS_TABLE")?,
            sessions_table: optional("SESSIONS_TABLE"),
            user_credits_table: optional("USER_CREDITS_TABLE"),
            platform_settings_table: optional("PLATFORM_SETTINGS_TABLE"),
            sink_endpoint: optional("SINK_ENDPOINT"),
            user_pool_id: required("USER_POOL_ID")?,
            region: required("AUTH_REGION")?,
            allow_no_token: flag("ALLOW_NO_TOKEN"),
            lenient_client_target: flag("LENIENT_CLIENT_TARGET"),
            listen_addr: optional("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8787".to_string()),
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("Missing required env var {name}"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
