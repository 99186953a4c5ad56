//! Signaling relay engine.
//!
//! Routes offers, answers, ICE candidates, and status frames between exactly
//! the intended pair of sockets:
//!
//! 1. Resolve direction: a frame arriving on the robot's own presence
//!    connection flows to the client; an explicit `target` is honored;
//!    everything else defaults to the robot.
//! 2. Gate robot-bound frames on the ACL and (for offers) the session lock.
//! 3. Resolve the destination connection id.
//! 4. Format the frame for the destination peer's dialect.
//! 5. Emit the monitor copy *before* attempting delivery, so observers see
//!    the frame even when delivery fails.
//! 6. Deliver at-most-once: `gone` is a stale registry row, logged and
//!    swallowed; the caller sees 200 regardless.
//! 7. A delivered initial offer to a robot opens the billing session.

use serde_json::Value;

use crate::auth::Claims;
use crate::authz::Authz;
use crate::error::BrokerError;
use crate::event::EventResponse;
use crate::monitor::MonitorFanout;
use crate::outbox::Outbox;
use crate::protocol::envelope::format_signal;
use crate::protocol::{InboundMessage, SignalFrame, SignalKind, Target};
use crate::session::SessionManager;
use crate::sink::SinkError;
use crate::store::{ConnectionsRepo, PresenceRepo};

/// Relays authenticated signaling frames.
#[derive(Clone)]
pub struct SignalRelay {
    connections: ConnectionsRepo,
    presence: PresenceRepo,
    authz: Authz,
    monitors: MonitorFanout,
    outbox: Outbox,
    sessions: Option<SessionManager>,
    lenient_client_target: bool,
}

impl std::fmt::Debug for SignalRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRelay")
            .field("lenient_client_target", &self.lenient_client_target)
            .finish_non_exhaustive()
    }
}

impl SignalRelay {
    /// Build a relay. `sessions` is `None` when billing is disabled.
    pub fn new(
        connections: ConnectionsRepo,
        presence: PresenceRepo,
        authz: Authz,
        monitors: MonitorFanout,
        outbox: Outbox,
        sessions: Option<SessionManager>,
        lenient_client_target: bool,
    ) -> Self {
        Self {
            connections,
            presence,
            authz,
            monitors,
            outbox,
            sessions,
            lenient_client_target,
        }
    }

    /// Relay one authenticated signaling frame from `source`.
    pub async fn handle(
        &self,
        source: &str,
        claims: &Claims,
        msg: &InboundMessage,
    ) -> EventResponse {
        let Some(kind) = msg.kind.and_then(|k| k.signal_kind()) else {
            return EventResponse::bad_request("Not a signaling frame");
        };
        let Some(robot_id) = msg.robot_id.as_deref() else {
            return EventResponse::bad_request("Signaling frame is missing robotId");
        };

        let presence = match self.presence.get(robot_id).await {
            Ok(p) => p,
            Err(e) => return BrokerError::from(e).response(),
        };
        let from_robot = presence
            .as_ref()
            .is_some_and(|p| p.connection_id == source);
        let target = msg.target.unwrap_or(if from_robot {
            Target::Client
        } else {
            Target::Robot
        });

        if target == Target::Robot {
            if !self.authz.can_access_robot(robot_id, claims, None).await {
                log::info!("{} denied access to {robot_id}", claims.user_id);
                self.outbox
                    .send_error(
                        source,
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
            if kind == SignalKind::Offer {
                if let Some(locked_by) =
                    self.authz.session_lock(robot_id, &claims.user_id).await
                {
                    log::info!("{robot_id} is locked by {locked_by}, rejecting offer");
                    self.outbox
                        .send_platform(
                            source,
                            &serde_json::json!({
                                "type": "session-locked",
                                "robotId": robot_id,
                                "lockedBy": locked_by,
                            }),
                        )
                        .await;
                    return BrokerError::SessionLocked {
                        robot_id: robot_id.to_string(),
                        locked_by,
                    }
                    .response();
                }
            }
        }

        // Destination resolution.
        let (destination, to, from, client_connection_id) = match target {
            Target::Client => {
                let client = msg.client_connection_id.clone().or_else(|| {
                    // Last chance: a robot-originated frame may still carry
                    // the client id in the original body's `to` field.
                    if from_robot {
                        msg.raw
                            .get("to")
                            .and_then(Value::as_str)
                            .map(String::from)
                    } else {
                        None
                    }
                });
                match client {
                    Some(client) => {
                        (client.clone(), client, robot_id.to_string(), None)
                    }
                    None => return self.client_unresolved(robot_id, source, msg, kind).await,
                }
            }
            Target::Robot => {
                let Some(p) = presence else {
                    return BrokerError::RobotOffline(robot_id.to_string()).response();
                };
                (
                    p.connection_id,
                    robot_id.to_string(),
                    source.to_string(),
                    Some(source.to_string()),
                )
            }
        };

        // The modulr-v0 payload names the client side of the exchange.
        let connection_id = match target {
            Target::Robot => client_connection_id.as_deref(),
            Target::Client => Some(to.as_str()),
        };
        let frame = format_signal(
            self.connections.protocol_of(&destination).await,
            &SignalFrame {
                kind,
                robot_id,
                to: &to,
                from: &from,
                connection_id,
                payload: &msg.payload,
            },
        );

        let direction = match target {
            Target::Robot => "client-to-robot",
            Target::Client => "robot-to-client",
        };
        // Monitor copy first: observers must see the frame even if delivery
        // fails.
        self.monitors
            .emit(robot_id, source, Some(target), direction, &frame)
            .await;

        match self.outbox.deliver(&destination, &frame).await {
            Ok(()) => {
                if kind == SignalKind::Offer && target == Target::Robot {
                    if let Some(sessions) = &self.sessions {
                        if let Err(e) =
                            sessions.start_after_offer(claims, robot_id, source).await
                        {
                            log::warn!("session start for {robot_id} failed: {e}");
                        }
                    }
                }
            }
            Err(SinkError::Gone) => {
                log::warn!("{destination} is gone, dropping {direction} frame for {robot_id}");
            }
            Err(e) => {
                log::error!("delivery to {destination} failed: {e}");
            }
        }
        EventResponse::ok()
    }

    /// A client-bound frame with no resolvable client connection id.
    ///
    /// Strict mode rejects it; lenient mode preserves the historical
    /// behavior of emitting only the monitor copy.
    async fn client_unresolved(
        &self,
        robot_id: &str,
        source: &str,
        msg: &InboundMessage,
        kind: SignalKind,
    ) -> EventResponse {
        if !self.lenient_client_target {
            return EventResponse::bad_request(
                "Client-bound frame is missing clientConnectionId",
            );
        }
        log::warn!("client-bound frame for {robot_id} has no clientConnectionId, monitor copy only");
        let frame = format_signal(
            crate::store::Protocol::Legacy,
            &SignalFrame {
                kind,
                robot_id,
                to: "",
                from: robot_id,
                connection_id: None,
                payload: &msg.payload,
            },
        );
        self.monitors
            .emit(robot_id, source, Some(Target::Client), "robot-to-client", &frame)
            .await;
        EventResponse::ok()
    }
}
