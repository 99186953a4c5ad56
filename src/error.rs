//! Broker error surface.
//!
//! Every error kind maps to the HTTP-style status code surfaced to the
//! transport layer. User-visible kinds are additionally pushed in-band over
//! the socket by the component that produced them; the in-band frame carries
//! the same information as human text.

use thiserror::Error;

use crate::event::EventResponse;
use crate::store::StoreError;

/// Errors surfaced to callers of the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Token missing, invalid, expired, or revoked.
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller is not in the robot's access-control list.
    #[error("Access denied for robot {robot_id}")]
    ForbiddenAcl {
        /// Robot the caller tried to reach.
        robot_id: String,
    },

    /// Caller is not the owner, an admin, or a delegated operator.
    #[error("Not an owner, admin, or operator of robot {robot_id}")]
    ForbiddenOwnership {
        /// Robot the caller tried to control.
        robot_id: String,
    },

    /// No live presence row for the target robot.
    #[error("Robot {0} is offline")]
    RobotOffline(String),

    /// Ownership claim rejected: the robot belongs to another user.
    #[error("Robot is already claimed by another owner")]
    OwnerConflict,

    /// An active session held by another user locks the robot.
    #[error("Robot {robot_id} is locked by {locked_by}")]
    SessionLocked {
        /// Robot the caller tried to reach.
        robot_id: String,
        /// Identity of the user holding the lock.
        locked_by: String,
    },

    /// Malformed frame: invalid JSON, unknown type, or missing field.
    #[error("{0}")]
    BadRequest(String),

    /// Durable-store failure on the primary path.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// HTTP-style status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::ForbiddenAcl { .. } | Self::ForbiddenOwnership { .. } => 403,
            Self::RobotOffline(_) => 404,
            Self::OwnerConflict => 409,
            Self::SessionLocked { .. } => 423,
            Self::BadRequest(_) => 400,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Render as a transport response.
    pub fn response(&self) -> EventResponse {
        EventResponse::new(self.status(), self.to_string())
    }
}
