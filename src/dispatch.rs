//! Top-level event dispatcher.
//!
//! Maps `(routeKey, normalized type)` to an action:
//!
//! ```text
//! $connect          auth via token, write Connection row, push welcome
//! $disconnect       end sessions, delete Connection row
//! $default register   claim RobotPresence under the ownership condition
//! $default monitor    ACL check, re-tag connection, push monitor-confirmed
//! $default takeover   ownership check, push admin-takeover to the robot
//! $default signaling  relay (see relay.rs)
//! $default ping/pong  keepalive
//! $default ready      welcome again
//! $default *          400 Unknown message type
//! ```

// Rust guideline compliant 2026-02

use std::sync::Arc;

use serde_json::{json, Value};

use crate::auth::{AuthResolver, Claims, TokenVerifier};
use crate::authz::{is_admin, Authz};
use crate::config::Config;
use crate::error::BrokerError;
use crate::event::{EventResponse, RouteKey, SocketEvent};
use crate::monitor::MonitorFanout;
use crate::outbox::Outbox;
use crate::protocol::envelope::{capabilities_reply, pong_reply, welcome_frame};
use crate::protocol::{normalize, InboundMessage, MessageKind};
use crate::relay::SignalRelay;
use crate::session::SessionManager;
use crate::sink::FrameSink;
use crate::store::{
    now_ms, ConnectionKind, ConnectionRecord, ConnectionsRepo, CreditsRepo, KeyValue,
    OperatorsRepo, PresenceRepo, Protocol, RevokedTokensRepo, RobotsRepo, SessionsRepo,
    SettingsRepo,
};

/// The signaling broker: all components wired over one store and one sink.
pub struct Broker {
    auth: AuthResolver,
    connections: ConnectionsRepo,
    presence: PresenceRepo,
    authz: Authz,
    relay: SignalRelay,
    sessions: Option<SessionManager>,
    monitors: MonitorFanout,
    outbox: Outbox,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("sessions_enabled", &self.sessions.is_some())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Wire the broker from configuration, a store, and a sink.
    pub fn new(config: &Config, store: Arc<dyn KeyValue>, sink: Arc<dyn FrameSink>) -> Self {
        let connections = ConnectionsRepo::new(Arc::clone(&store), &config.connections_table);
        let presence = PresenceRepo::new(Arc::clone(&store), &config.robot_presence_table);
        let operators = OperatorsRepo::new(Arc::clone(&store), &config.robot_operators_table);
        let robots = RobotsRepo::new(Arc::clone(&store), &config.robots_table);
        let revoked = RevokedTokensRepo::new(Arc::clone(&store), &config.revoked_tokens_table);
        let sessions_repo = config
            .sessions_table
            .as_ref()
            .map(|table| SessionsRepo::new(Arc::clone(&store), table));
        let credits = config
            .user_credits_table
            .as_ref()
            .map(|table| CreditsRepo::new(Arc::clone(&store), table));
        let settings = config
            .platform_settings_table
            .as_ref()
            .map(|table| SettingsRepo::new(Arc::clone(&store), table));

        let verifier = Arc::new(TokenVerifier::new(
            &config.region,
            &config.user_pool_id,
            revoked,
        ));
        let auth = AuthResolver::new(connections.clone(), verifier, config.allow_no_token);
        let outbox = Outbox::new(Arc::clone(&sink), connections.clone());
        let monitors = MonitorFanout::new(connections.clone(), sink);
        let authz = Authz::new(
            presence.clone(),
            operators,
            robots.clone(),
            sessions_repo.clone(),
        );
        let sessions = sessions_repo.map(|repo| {
            SessionManager::new(repo, robots, credits, settings, outbox.clone())
        });
        let relay = SignalRelay::new(
            connections.clone(),
            presence.clone(),
            authz.clone(),
            monitors.clone(),
            outbox.clone(),
            sessions.clone(),
            config.lenient_client_target,
        );

        Self {
            auth,
            connections,
            presence,
            authz,
            relay,
            sessions,
            monitors,
            outbox,
        }
    }

    /// Handle one transport event.
    pub async fn handle(&self, event: &SocketEvent) -> EventResponse {
        match event.route_key {
            RouteKey::Connect => self.on_connect(event).await,
            RouteKey::Disconnect => self.on_disconnect(event).await,
            RouteKey::Default => self.on_frame(event).await,
        }
    }

    async fn on_connect(&self, event: &SocketEvent) -> EventResponse {
        let token = event.query.get("token").map(String::as_str);
        let Some(claims) = self.auth.claims_for_handshake(token).await else {
            log::info!("handshake rejected for {}", event.connection_id);
            return BrokerError::Unauthorized.response();
        };

        let record = ConnectionRecord {
            connection_id: event.connection_id.clone(),
            user_id: claims.user_id.clone(),
            username: claims.username.clone(),
            email: claims.email.clone(),
            groups: claims.groups_joined(),
            kind: ConnectionKind::Client,
            monitoring_robot_id: None,
            protocol: Protocol::Legacy,
            ts: now_ms(),
        };
        if let Err(e) = self.connections.put(&record).await {
            log::error!("failed to persist connection {}: {e}", event.connection_id);
            return BrokerError::from(e).response();
        }
        log::info!("{} connected as {}", event.connection_id, claims.user_id);
        self.outbox
            .send_platform(&event.connection_id, &welcome_frame(&event.connection_id))
            .await;
        EventResponse::ok()
    }

    async fn on_disconnect(&self, event: &SocketEvent) -> EventResponse {
        if let Some(sessions) = &self.sessions {
            if let Err(e) = sessions.end_for_connection(&event.connection_id).await {
                log::warn!(
                    "session close-out for {} failed: {e}",
                    event.connection_id
                );
            }
        }
        if let Err(e) = self.connections.delete(&event.connection_id).await {
            // Nothing actionable for a socket that is already closed; the
            // stale row is detected later by delivery failure.
            log::warn!(
                "failed to delete connection row {}: {e}",
                event.connection_id
            );
        }
        log::info!("{} disconnected", event.connection_id);
        EventResponse::ok()
    }

    async fn on_frame(&self, event: &SocketEvent) -> EventResponse {
        let Some(body) = event.body.as_deref() else {
            return EventResponse::bad_request("Empty frame");
        };
        // Parser errors short-circuit before any store access.
        let body: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return EventResponse::bad_request("Invalid JSON"),
        };
        let msg = normalize(&body);

        let token = body.get("token").and_then(Value::as_str);
        let Some(claims) = self
            .auth
            .claims_for_frame(&event.connection_id, token)
            .await
        else {
            return BrokerError::Unauthorized.response();
        };

        // Any versioned frame promotes the connection to modulr-v0.
        if msg.versioned {
            if let Err(e) = self.connections.promote_protocol(&event.connection_id).await {
                log::warn!(
                    "protocol promotion for {} failed: {e}",
                    event.connection_id
                );
            }
        }

        let Some(kind) = msg.kind else {
            log::debug!(
                "unknown message type {:?} from {}",
                msg.raw_type,
                event.connection_id
            );
            return EventResponse::bad_request("Unknown message type");
        };

        match kind {
            MessageKind::Register => self.on_register(event, &claims, &msg).await,
            MessageKind::Monitor => self.on_monitor(event, &claims, &msg).await,
            MessageKind::Takeover => self.on_takeover(event, &claims, &msg).await,
            MessageKind::Ping | MessageKind::AgentPing => {
                self.outbox
                    .send_platform(
                        &event.connection_id,
                        &pong_reply(kind == MessageKind::AgentPing, msg.id.as_deref()),
                    )
                    .await;
                EventResponse::ok()
            }
            MessageKind::Pong | MessageKind::AgentPong => {
                if let Err(e) = self.connections.touch(&event.connection_id).await {
                    log::warn!("keepalive for {} failed: {e}", event.connection_id);
                }
                EventResponse::ok()
            }
            MessageKind::Ready => {
                self.outbox
                    .send_platform(&event.connection_id, &welcome_frame(&event.connection_id))
                    .await;
                EventResponse::ok()
            }
            MessageKind::V0Capabilities => {
                self.outbox
                    .send_platform(&event.connection_id, &capabilities_reply(msg.id.as_deref()))
                    .await;
                EventResponse::ok()
            }
            _ => self.relay.handle(&event.connection_id, &claims, &msg).await,
        }
    }

    /// `register`: claim presence under the ownership condition.
    async fn on_register(
        &self,
        event: &SocketEvent,
        claims: &Claims,
        msg: &InboundMessage,
    ) -> EventResponse {
        let Some(robot_id) = msg.robot_id.as_deref() else {
            return EventResponse::bad_request("register requires robotId");
        };

        match self
            .presence
            .claim(robot_id, &claims.user_id, &event.connection_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if is_admin(claims) {
                    log::warn!(
                        "admin {} force-claims {robot_id}",
                        claims.user_id
                    );
                    if let Err(e) = self
                        .presence
                        .force_claim(robot_id, &claims.user_id, &event.connection_id)
                        .await
                    {
                        return BrokerError::from(e).response();
                    }
                } else {
                    log::info!(
                        "{} denied claim of {robot_id}: already owned",
                        claims.user_id
                    );
                    return BrokerError::OwnerConflict.response();
                }
            }
            Err(e) => return BrokerError::from(e).response(),
        }

        log::info!(
            "{robot_id} registered on {} by {}",
            event.connection_id,
            claims.user_id
        );
        self.monitors
            .emit(
                robot_id,
                &event.connection_id,
                None,
                "register",
                &json!({
                    "type": "register",
                    "robotId": robot_id,
                    "connectionId": event.connection_id,
                }),
            )
            .await;
        EventResponse::ok()
    }

    /// `monitor`: subscribe the connection as a read-only observer.
    async fn on_monitor(
        &self,
        event: &SocketEvent,
        claims: &Claims,
        msg: &InboundMessage,
    ) -> EventResponse {
        let Some(robot_id) = msg.robot_id.as_deref() else {
            return EventResponse::bad_request("monitor requires robotId");
        };
        if !self.authz.can_access_robot(robot_id, claims, None).await {
            self.outbox
                .send_error(
                    &event.connection_id,
                    "access_denied",
                    &format!("You do not have access to robot {robot_id}"),
                    Some(robot_id),
                )
                .await;
            return BrokerError::ForbiddenAcl {
                robot_id: robot_id.to_string(),
            }
            .response();
        }
        if let Err(e) = self
            .connections
            .subscribe_monitor(&event.connection_id, robot_id)
            .await
        {
            return BrokerError::from(e).response();
        }
        log::info!("{} monitoring {robot_id}", event.connection_id);
        self.outbox
            .send_platform(
                &event.connection_id,
                &json!({"type": "monitor-confirmed", "robotId": robot_id}),
            )
            .await;
        EventResponse::ok()
    }

    /// `takeover`: owner/admin pushes an `admin-takeover` frame to the robot.
    async fn on_takeover(
        &self,
        event: &SocketEvent,
        claims: &Claims,
        msg: &InboundMessage,
    ) -> EventResponse {
        let Some(robot_id) = msg.robot_id.as_deref() else {
            return EventResponse::bad_request("takeover requires robotId");
        };
        if !self.authz.is_owner_or_admin(robot_id, claims).await {
            log::info!(
                "{} denied takeover of {robot_id}",
                claims.user_id
            );
            return BrokerError::ForbiddenOwnership {
                robot_id: robot_id.to_string(),
            }
            .response();
        }
        let presence = match self.presence.get(robot_id).await {
            Ok(Some(p)) => p,
            Ok(None) => return BrokerError::RobotOffline(robot_id.to_string()).response(),
            Err(e) => return BrokerError::from(e).response(),
        };
        self.outbox
            .send_platform(
                &presence.connection_id,
                &json!({
                    "type": "admin-takeover",
                    "robotId": robot_id,
                    "requestedBy": claims.user_id,
                }),
            )
            .await;
        log::info!("{} took over {robot_id}", claims.user_id);
        EventResponse::ok()
    }
}
