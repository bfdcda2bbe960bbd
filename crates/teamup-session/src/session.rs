//! Session transitions: what may happen to a session, and who may do it.
//!
//! ```text
//!   Pending ──(accept)──→ Active ──(complete)──→ Completed
//!      │                     │
//!      └─(reject/cancel)──→ Cancelled ←──(cancel)──┘
//! ```
//!
//! The rules live in [`SessionAction::permits`] and
//! [`SessionAction::target`], kept apart so the manager can report *who*
//! was refused before it reports *what* was refused.

use std::fmt;

use teamup_protocol::{Participant, QueueEntryId, SessionStatus, UserId};

// ---------------------------------------------------------------------------
// SessionAction
// ---------------------------------------------------------------------------

/// Something a participant asks to do to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionAction {
    /// Teammate takes the order: Pending → Active.
    Accept,
    /// Either side turns the order down: Pending → Cancelled.
    Reject,
    /// Either side marks the session done: Active → Completed.
    Complete,
    /// Either side calls it off: Pending/Active → Cancelled.
    Cancel,
}

impl SessionAction {
    /// Returns `true` if this side of the session may perform the action
    /// at all, regardless of the session's status.
    pub fn permits(self, who: Participant) -> bool {
        match self {
            Self::Accept => who == Participant::Teammate,
            Self::Reject | Self::Complete | Self::Cancel => true,
        }
    }

    /// The status this action leads to from `from`, or `None` if the
    /// transition isn't in the table.
    pub fn target(self, from: SessionStatus) -> Option<SessionStatus> {
        use SessionStatus::*;

        match (self, from) {
            (Self::Accept, Pending) => Some(Active),
            (Self::Reject, Pending) => Some(Cancelled),
            (Self::Complete, Active) => Some(Completed),
            (Self::Cancel, Pending | Active) => Some(Cancelled),
            _ => None,
        }
    }

    /// Whether reaching the target stamps `end_time`.
    ///
    /// A Pending session that's rejected or cancelled never started, so
    /// only leaving Active records an end.
    pub(crate) fn ends_from(self, from: SessionStatus) -> bool {
        from == SessionStatus::Active && matches!(self, Self::Complete | Self::Cancel)
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
            Self::Complete => write!(f, "complete"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

// ---------------------------------------------------------------------------
// NewSession
// ---------------------------------------------------------------------------

/// Everything needed to open a Pending session.
///
/// `queue_entry` is `Some` when the matcher consumed a queue entry and
/// `None` for direct orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub client_id: UserId,
    pub teammate_id: UserId,
    pub game: String,
    pub mode: String,
    pub duration: u32,
    pub price: u64,
    pub queue_entry: Option<QueueEntryId>,
}
