//! Core data types shared by every Teamup crate.
//!
//! These are the entities of the matchmaking core (queue entries,
//! sessions, presence records, chat messages) plus the identifier
//! newtypes that key them. All of them travel "on the wire" inside
//! [`ServerEvent`](crate::ServerEvent)s, so they derive `Serialize` and
//! `Deserialize`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a user (client or teammate).
///
/// This is a "newtype wrapper": a `u64` with its own name, so a
/// `SessionId` can never be passed where a `UserId` is expected.
///
/// `#[serde(transparent)]` serializes it as the bare number, so
/// `UserId(42)` becomes `42` in JSON rather than `{ "0": 42 }`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// A unique identifier for a session (one client/teammate engagement).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// A unique identifier for a waiting queue entry.
///
/// Ids are handed out by a monotonic counter, so comparing two ids also
/// tells you which entry was created first. The queue uses that as the
/// tiebreak when two entries share an `enqueued_at` timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct QueueEntryId(pub u64);

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q-{}", self.0)
    }
}

/// A unique identifier for a chat message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identity: who is on the other end of a connection
// ---------------------------------------------------------------------------

/// What a verified user is allowed to act as.
///
/// `#[serde(tag = "kind")]` gives the internally tagged form
/// `{ "kind": "Teammate", "game": "valorant" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Role {
    /// A paying client. Clients enqueue and place orders.
    Client,

    /// A pro teammate offering sessions for one game.
    Teammate { game: String },
}

/// A verified identity, produced by an `Authenticator` at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    /// Creates a client identity.
    pub fn client(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Client,
        }
    }

    /// Creates a teammate identity for `game`.
    pub fn teammate(user_id: UserId, game: impl Into<String>) -> Self {
        Self {
            user_id,
            role: Role::Teammate { game: game.into() },
        }
    }

    /// The one role check used across the codebase.
    pub fn is_teammate(&self) -> bool {
        matches!(self.role, Role::Teammate { .. })
    }

    /// The game a teammate plays, or `None` for clients.
    pub fn teammate_game(&self) -> Option<&str> {
        match &self.role {
            Role::Teammate { game } => Some(game),
            Role::Client => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// Whether the charge behind a queue entry has cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// The payment processor hasn't reported back yet. The entry holds
    /// the requester's place but is not eligible for matching.
    AwaitingPayment,

    /// Paid (or free). Eligible for matching.
    #[default]
    Settled,
}

/// A client's waiting request for a teammate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub requester_id: UserId,
    pub game: String,
    pub mode: String,
    /// Session length in minutes.
    pub duration: u32,
    /// Price in the smallest currency unit.
    pub price: u64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub payment: PaymentState,
}

impl QueueEntry {
    /// Returns `true` if the matcher may consume this entry.
    pub fn is_eligible(&self) -> bool {
        self.payment == PaymentState::Settled
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
///   Pending ──(accept)──→ Active ──(complete)──→ Completed
///      │                     │
///      └──(reject/cancel)──→ Cancelled ←──(cancel)──┘
/// ```
///
/// Completed and Cancelled are terminal: nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Returns `true` for Pending and Active: the teammate is booked.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    /// Returns `true` for Completed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Active => write!(f, "Active"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Which side of a session a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Participant {
    Client,
    Teammate,
}

/// A matched engagement between one client and one teammate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub client_id: UserId,
    /// `None` only for sessions that were created without a teammate;
    /// the matcher and the direct-order path always fill it in.
    pub teammate_id: Option<UserId>,
    pub game: String,
    pub mode: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub price: u64,
    pub duration: u32,
    /// The queue entry this session consumed, if it came from the queue.
    pub queue_entry: Option<QueueEntryId>,
}

impl Session {
    /// Returns which side `user` is on, or `None` for outsiders.
    pub fn participant(&self, user: UserId) -> Option<Participant> {
        if user == self.client_id {
            Some(Participant::Client)
        } else if self.teammate_id == Some(user) {
            Some(Participant::Teammate)
        } else {
            None
        }
    }

    /// Returns `true` if `user` is the client or the teammate.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.participant(user).is_some()
    }

    /// Both participants, client first.
    pub fn participants(&self) -> Vec<UserId> {
        let mut users = vec![self.client_id];
        users.extend(self.teammate_id);
        users
    }
}

// ---------------------------------------------------------------------------
// Chat, presence, queue statistics, voice
// ---------------------------------------------------------------------------

/// A chat message relayed within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Online/offline bookkeeping for one teammate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen_at: DateTime<Utc>,
    pub current_game: Option<String>,
}

/// Aggregate queue state for one game, broadcast on `queue:<game>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub game: String,
    pub queue_length: usize,
    /// Minutes.
    pub estimated_wait_time: u32,
    pub available_teammate_count: usize,
}

/// The voice channel attached to a session, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChannel {
    pub session_id: SessionId,
    pub members: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session {
            id: SessionId(1),
            client_id: UserId(10),
            teammate_id: Some(UserId(20)),
            game: "valorant".into(),
            mode: "ranked".into(),
            status: SessionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            price: 10,
            duration: 60,
            queue_entry: Some(QueueEntryId(5)),
        }
    }

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&UserId(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&SessionId(7)).unwrap(), "7");
        let id: QueueEntryId = serde_json::from_str("9").unwrap();
        assert_eq!(id, QueueEntryId(9));
    }

    #[test]
    fn test_ids_display_with_prefix() {
        assert_eq!(UserId(7).to_string(), "U-7");
        assert_eq!(SessionId(3).to_string(), "S-3");
        assert_eq!(QueueEntryId(1).to_string(), "Q-1");
        assert_eq!(MessageId(2).to_string(), "M-2");
    }

    #[test]
    fn test_identity_is_teammate() {
        assert!(!Identity::client(UserId(1)).is_teammate());
        let pro = Identity::teammate(UserId(2), "valorant");
        assert!(pro.is_teammate());
        assert_eq!(pro.teammate_game(), Some("valorant"));
    }

    #[test]
    fn test_role_json_is_internally_tagged() {
        let json =
            serde_json::to_value(Identity::teammate(UserId(2), "dota")).unwrap();
        assert_eq!(json["role"]["kind"], "Teammate");
        assert_eq!(json["role"]["game"], "dota");
    }

    #[test]
    fn test_session_status_open_and_terminal() {
        assert!(SessionStatus::Pending.is_open());
        assert!(SessionStatus::Active.is_open());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_session_participant_lookup() {
        let session = sample_session();
        assert_eq!(session.participant(UserId(10)), Some(Participant::Client));
        assert_eq!(session.participant(UserId(20)), Some(Participant::Teammate));
        assert_eq!(session.participant(UserId(30)), None);
        assert_eq!(session.participants(), vec![UserId(10), UserId(20)]);
    }

    #[test]
    fn test_queue_entry_payment_defaults_to_settled() {
        let json = r#"{
            "id": 1, "requester_id": 2, "game": "valorant", "mode": "ranked",
            "duration": 60, "price": 10, "enqueued_at": "2024-01-01T00:00:00Z"
        }"#;
        let entry: QueueEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.payment, PaymentState::Settled);
        assert!(entry.is_eligible());
    }
}
