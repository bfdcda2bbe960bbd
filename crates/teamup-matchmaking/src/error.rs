//! Error types for the matchmaking layer.

use teamup_bus::BusError;
use teamup_protocol::{QueueEntryId, SessionId, UserId};
use teamup_session::SessionError;

use crate::StoreError;

/// The coarse categories every matchmaking failure falls into.
///
/// The server turns these into user-facing error codes; nothing else
/// should need to look deeper than this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyQueued,
    NotAuthorized,
    InvalidTransition,
    NotFound,
    /// The entry was already matched or removed; stop retrying.
    ConcurrentModification,
    Unavailable,
    InvalidInput,
    Internal,
}

/// Errors that can occur in the matchmaking layer.
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    /// The requester already has a waiting entry.
    #[error("user {0} is already queued")]
    AlreadyQueued(UserId),

    #[error("user {0} has no waiting queue entry")]
    NotQueued(UserId),

    #[error("queue entry {0} not found")]
    EntryNotFound(QueueEntryId),

    #[error("user {user} may not {action}")]
    NotAuthorized { user: UserId, action: &'static str },

    #[error("queue entry {0} was already matched or removed")]
    ConcurrentModification(QueueEntryId),

    /// Direct order to a teammate that is offline, busy, blocked, or
    /// plays a different game.
    #[error("teammate {0} is unavailable")]
    Unavailable(UserId),

    #[error("user {0} is not a teammate")]
    NotATeammate(UserId),

    /// Chat or voice on a Completed/Cancelled session.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl MatchmakingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyQueued(_) => ErrorKind::AlreadyQueued,
            Self::NotQueued(_) | Self::EntryNotFound(_) => ErrorKind::NotFound,
            Self::NotAuthorized { .. } | Self::NotATeammate(_) => ErrorKind::NotAuthorized,
            Self::ConcurrentModification(_) => ErrorKind::ConcurrentModification,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::SessionClosed(_) => ErrorKind::InvalidTransition,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Store(_) | Self::Bus(_) => ErrorKind::Internal,
            Self::Session(inner) => match inner {
                SessionError::AuthFailed(_) | SessionError::NotAuthorized { .. } => {
                    ErrorKind::NotAuthorized
                }
                SessionError::NotFound(_) => ErrorKind::NotFound,
                SessionError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                SessionError::TeammateBusy(_) => ErrorKind::Unavailable,
                SessionError::EntryConsumed(_) => ErrorKind::ConcurrentModification,
            },
        }
    }
}
