//! Error types for the session layer.

use teamup_protocol::{QueueEntryId, SessionId, SessionStatus, UserId};

use crate::SessionAction;

/// Errors that can occur while authenticating or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token was invalid, expired, or rejected by the
    /// [`Authenticator`](crate::Authenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The caller isn't a participant, or their side of the session may
    /// not perform this action (a client can't accept).
    #[error("user {user} may not act on session {session}")]
    NotAuthorized { session: SessionId, user: UserId },

    /// The action isn't allowed from the session's current status.
    #[error("cannot {action} session {session} while {status}")]
    InvalidTransition {
        session: SessionId,
        status: SessionStatus,
        action: SessionAction,
    },

    /// The teammate already holds a Pending or Active session.
    #[error("teammate {0} is already booked")]
    TeammateBusy(UserId),

    /// Another session already consumed this queue entry.
    #[error("queue entry {0} already consumed")]
    EntryConsumed(QueueEntryId),
}
