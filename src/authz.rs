//! Authorization engine.
//!
//! Per-action decisions for `(user, robot, action)` tuples. Each predicate
//! encodes its fail-mode explicitly:
//!
//! - ACL and robot-table reads **fail open** — a store outage must not cut
//!   every operator off from every robot.
//! - Delegation reads **fail closed** — an outage must not escalate a
//!   non-operator into one.
//! - The session-lock read is best-effort: a racing second session is
//!   tolerated because billing close-out still runs on disconnect.

use crate::auth::Claims;
use crate::store::{OperatorsRepo, PresenceRepo, RobotsRepo, SessionsRepo};

/// Whether the claims carry an admin group.
///
/// Accepted forms: exact `ADMINS`, exact `admin`, or any casing of `admin`.
pub fn is_admin(claims: &Claims) -> bool {
    claims
        .groups
        .iter()
        .any(|g| g == "ADMINS" || g == "admin" || g.eq_ignore_ascii_case("admin"))
}

/// Ownership, delegation, ACL, and session-lock decisions.
#[derive(Clone)]
pub struct Authz {
    presence: PresenceRepo,
    operators: OperatorsRepo,
    robots: RobotsRepo,
    sessions: Option<SessionsRepo>,
}

impl std::fmt::Debug for Authz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authz")
            .field("sessions_enabled", &self.sessions.is_some())
            .finish_non_exhaustive()
    }
}

impl Authz {
    /// Build the engine. `sessions` is `None` when the sessions table is not
    /// configured, which disables the lock entirely.
    pub fn new(
        presence: PresenceRepo,
        operators: OperatorsRepo,
        robots: RobotsRepo,
        sessions: Option<SessionsRepo>,
    ) -> Self {
        Self {
            presence,
            operators,
            robots,
            sessions,
        }
    }

    /// True iff the caller owns the robot, carries an admin group, or holds
    /// a delegation row.
    pub async fn is_owner_or_admin(&self, robot_id: &str, claims: &Claims) -> bool {
        if is_admin(claims) {
            return true;
        }
        match self.presence.get(robot_id).await {
            Ok(Some(p)) if p.owner_user_id == claims.user_id => return true,
            Ok(_) => {}
            Err(e) => log::warn!("presence read for {robot_id} failed: {e}"),
        }
        // Delegation fails closed: an unreadable table grants nothing.
        match self.operators.is_delegate(robot_id, &claims.user_id).await {
            Ok(delegated) => delegated,
            Err(e) => {
                log::warn!("delegation lookup for {robot_id} failed (fail closed): {e}");
                false
            }
        }
    }

    /// True iff the caller may signal the robot: owner/admin/delegate, or
    /// the robot's ACL is open, or one of the caller's identifiers is listed.
    ///
    /// A robot with no row in the Robots table is a legacy device: allow.
    /// Store errors fail open with a logged warning.
    pub async fn can_access_robot(
        &self,
        robot_id: &str,
        claims: &Claims,
        identifier: Option<&str>,
    ) -> bool {
        if self.is_owner_or_admin(robot_id, claims).await {
            return true;
        }
        match self.robots.by_robot_id(robot_id).await {
            Ok(None) => true,
            Ok(Some(robot)) => match &robot.allowed_users {
                None => true,
                Some(list) if list.is_empty() => true,
                Some(list) => {
                    let ids = claims.acl_identifiers(identifier);
                    list.iter()
                        .map(|entry| entry.to_lowercase())
                        .any(|entry| ids.contains(&entry))
                }
            },
            Err(e) => {
                log::warn!("ACL read for {robot_id} failed (fail open): {e}");
                true
            }
        }
    }

    /// Identity of the user holding an active session on the robot, if that
    /// user differs from `current_user`. Checked only on fresh offers.
    pub async fn session_lock(&self, robot_id: &str, current_user: &str) -> Option<String> {
        let sessions = self.sessions.as_ref()?;
        match sessions.active_for_robot(robot_id).await {
            Ok(Some(session)) if session.user_id != current_user => {
                Some(if session.user_email.is_empty() {
                    session.user_id
                } else {
                    session.user_email
                })
            }
            Ok(_) => None,
            Err(e) => {
                // Best-effort: a racing or unreadable lock admits the offer;
                // the close-out on disconnect still settles billing.
                log::warn!("session-lock read for {robot_id} failed: {e}");
                None
            }
        }
    }
}
