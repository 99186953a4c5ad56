//! Billing-session lifecycle.
//!
//! A session opens on the first offer successfully forwarded to a robot and
//! closes when the client connection drops (or when the same user opens a
//! new session elsewhere — the previous one is force-completed). The
//! single-active invariant is not transactional: a racing second offer is
//! resolved by the close-other-sessions step, and billing close-out on
//! disconnect settles whatever remains.

use serde_json::{json, Map};
use uuid::Uuid;

use crate::auth::Claims;
use crate::outbox::Outbox;
use crate::store::{
    now_ms, CreditsRepo, RobotsRepo, SessionRecord, SessionStatus, SessionsRepo, SettingsRepo,
    StoreError,
};

/// Opens and closes billing sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: SessionsRepo,
    robots: RobotsRepo,
    credits: Option<CreditsRepo>,
    settings: Option<SettingsRepo>,
    outbox: Outbox,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("credits_enabled", &self.credits.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build a manager. `credits`/`settings` are `None` when their tables
    /// are not configured; paid robots then start sessions without a balance
    /// check (availability over billing, logged).
    pub fn new(
        sessions: SessionsRepo,
        robots: RobotsRepo,
        credits: Option<CreditsRepo>,
        settings: Option<SettingsRepo>,
        outbox: Outbox,
    ) -> Self {
        Self {
            sessions,
            robots,
            credits,
            settings,
            outbox,
        }
    }

    /// Open (or reuse) a session after an offer was delivered to the robot.
    ///
    /// Pushes `session-created` on success and an `insufficient_funds` error
    /// when the caller cannot afford one minute of session time.
    pub async fn start_after_offer(
        &self,
        claims: &Claims,
        robot_id: &str,
        connection_id: &str,
    ) -> Result<(), StoreError> {
        // Idempotency: an active session for the same (user, robot) is
        // reused rather than duplicated.
        let active = self.sessions.active_by_user(&claims.user_id).await?;
        if let Some(existing) = active.iter().find(|s| s.robot_id == robot_id) {
            log::debug!(
                "reusing active session {} for {} on {robot_id}",
                existing.id,
                claims.user_id
            );
            self.push_created(connection_id, &existing.id).await;
            return Ok(());
        }

        if !self.balance_covers_first_minute(claims, robot_id, connection_id).await? {
            return Ok(());
        }

        // Single-active-session: close everything else the user has open.
        for other in active {
            log::info!(
                "force-completing session {} for {} (new session on {robot_id})",
                other.id,
                other.user_id
            );
            self.sessions.complete(other).await?;
        }

        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: claims.user_id.clone(),
            user_email: claims.email.clone(),
            robot_id: robot_id.to_string(),
            connection_id: connection_id.to_string(),
            status: SessionStatus::Active,
            started_at: now_ms(),
            ended_at: None,
            duration_seconds: None,
        };
        self.sessions.put(&session).await?;
        log::info!(
            "session {} started: {} on {robot_id}",
            session.id,
            claims.user_id
        );
        self.push_created(connection_id, &session.id).await;
        Ok(())
    }

    /// End every active session bound to a closing client connection.
    pub async fn end_for_connection(&self, connection_id: &str) -> Result<(), StoreError> {
        for session in self.sessions.active_by_connection(connection_id).await? {
            log::info!(
                "session {} completed on disconnect of {connection_id}",
                session.id
            );
            self.sessions.complete(session).await?;
        }
        Ok(())
    }

    /// Check the caller's balance against one minute of session time:
    /// `(rate / 60) * (1 + markup / 100)`. Free robots skip the check.
    async fn balance_covers_first_minute(
        &self,
        claims: &Claims,
        robot_id: &str,
        connection_id: &str,
    ) -> Result<bool, StoreError> {
        let rate = self
            .robots
            .by_robot_id(robot_id)
            .await?
            .map(|r| r.hourly_rate_credits)
            .unwrap_or(0.0);
        if rate <= 0.0 {
            return Ok(true);
        }
        let Some(credits_repo) = &self.credits else {
            log::debug!("no credits table configured, skipping balance check for {robot_id}");
            return Ok(true);
        };

        let markup = match &self.settings {
            Some(settings) => settings.markup_percent().await,
            None => crate::store::DEFAULT_MARKUP_PERCENT,
        };
        let required = (rate / 60.0) * (1.0 + markup / 100.0);
        let credits = credits_repo.credits_for(&claims.user_id).await?;
        if credits >= required {
            return Ok(true);
        }

        log::info!(
            "insufficient funds for {} on {robot_id}: {credits:.4} < {required:.4}",
            claims.user_id
        );
        let mut extra = Map::new();
        extra.insert("currentCredits".into(), json!(credits));
        extra.insert("requiredCredits".into(), json!(required));
        self.outbox
            .send_error_fields(
                connection_id,
                "insufficient_funds",
                "Insufficient credits to start a session",
                Some(robot_id),
                extra,
            )
            .await;
        Ok(false)
    }

    async fn push_created(&self, connection_id: &str, session_id: &str) {
        self.outbox
            .send_platform(
                connection_id,
                &json!({"type": "session-created", "sessionId": session_id}),
            )
            .await;
    }
}
