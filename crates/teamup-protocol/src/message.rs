//! Wire messages: what clients send, what the server sends back, and the
//! envelope both travel in.
//!
//! Requests and events are separate enums because they flow in opposite
//! directions. A client never sends a `match:found`, and the server never
//! receives one, so the type system keeps the two apart.

use serde::{Deserialize, Serialize};

use crate::{
    ChannelKey, ChatMessage, PresenceRecord, QueueEntry, QueueEntryId,
    QueueSnapshot, Session, SessionId, UserId, VoiceChannel,
};

// ---------------------------------------------------------------------------
// ClientRequest: client → server
// ---------------------------------------------------------------------------

/// Everything a client may ask the server to do.
///
/// `#[serde(tag = "type")]` produces `{ "type": "Enqueue", "game": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    // -- Connection lifecycle --

    /// Must be the first message on a connection.
    Handshake {
        version: u32,
        token: Option<String>,
    },

    /// Keep-alive. The server echoes `client_time` back.
    Heartbeat { client_time: u64 },

    /// "I'm leaving." The server closes the connection.
    Disconnect { reason: String },

    // -- Queue --

    /// Join the matchmaking queue for a game.
    ///
    /// `awaiting_payment` marks the entry as waiting for the payment
    /// processor's callback; it won't be matched until the charge clears.
    Enqueue {
        game: String,
        mode: String,
        duration: u32,
        price: u64,
        #[serde(default)]
        awaiting_payment: bool,
    },

    /// Leave the queue (drops the caller's waiting entry).
    LeaveQueue,

    /// Ask for the current queue snapshot of a game.
    QueueStatus { game: String },

    // -- Teammate presence --

    /// Teammates only: toggle availability without disconnecting.
    SetAvailability { online: bool },

    // -- Sessions --

    /// Book a specific teammate directly, skipping the queue.
    DirectOrder {
        teammate_id: UserId,
        game: String,
        mode: String,
        duration: u32,
        price: u64,
    },

    Accept { session_id: SessionId },
    Reject { session_id: SessionId },
    Complete { session_id: SessionId },
    Cancel { session_id: SessionId },

    // -- Chat & channels --

    SendMessage {
        session_id: SessionId,
        content: String,
    },

    ChatHistory { session_id: SessionId },

    JoinChannel { channel: ChannelKey },
    LeaveChannel { channel: ChannelKey },

    // -- Voice --

    JoinVoice { session_id: SessionId },
    LeaveVoice { session_id: SessionId },
}

// ---------------------------------------------------------------------------
// ServerEvent: server → client
// ---------------------------------------------------------------------------

/// Why a queue entry disappeared without being matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// The requester left on their own.
    Requested,
    /// The payment processor reported a failed charge.
    PaymentFailed,
}

/// Everything the server may send to a client.
///
/// Each variant is renamed to the event name clients subscribe to, e.g.
/// `{ "event": "match:found", "session": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    #[serde(rename = "handshake:ack")]
    HandshakeAck {
        user_id: UserId,
        teammate: bool,
        server_time: u64,
    },

    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Generic success reply for requests whose effect is announced on
    /// channels (transitions, chat, voice).
    #[serde(rename = "ack")]
    Ack,

    #[serde(rename = "queue:joined")]
    QueueJoined { entry: QueueEntry, position: usize },

    #[serde(rename = "queue:left")]
    QueueLeft {
        entry_id: QueueEntryId,
        reason: LeaveReason,
    },

    #[serde(rename = "queue:update")]
    QueueUpdate(QueueSnapshot),

    /// A Pending session now exists for both parties.
    #[serde(rename = "match:found")]
    MatchFound { session: Session },

    #[serde(rename = "session:status")]
    SessionStatus { session: Session },

    #[serde(rename = "chat:message")]
    ChatMessage { message: ChatMessage },

    #[serde(rename = "chat:history")]
    ChatHistory {
        session_id: SessionId,
        messages: Vec<ChatMessage>,
    },

    #[serde(rename = "presence:updated")]
    PresenceUpdated { record: PresenceRecord },

    #[serde(rename = "teammate:online")]
    TeammateOnline { user_id: UserId, game: String },

    #[serde(rename = "teammate:offline")]
    TeammateOffline { user_id: UserId },

    #[serde(rename = "voice:update")]
    VoiceUpdate(VoiceChannel),

    #[serde(rename = "channel:joined")]
    ChannelJoined { channel: ChannelKey },

    #[serde(rename = "channel:left")]
    ChannelLeft { channel: ChannelKey },

    /// `code` follows HTTP conventions (400, 401, 403, 404, 409, 500).
    #[serde(rename = "error")]
    Error { code: u16, message: String },
}

impl ServerEvent {
    /// The event name as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::HandshakeAck { .. } => "handshake:ack",
            Self::HeartbeatAck { .. } => "heartbeat:ack",
            Self::Ack => "ack",
            Self::QueueJoined { .. } => "queue:joined",
            Self::QueueLeft { .. } => "queue:left",
            Self::QueueUpdate(_) => "queue:update",
            Self::MatchFound { .. } => "match:found",
            Self::SessionStatus { .. } => "session:status",
            Self::ChatMessage { .. } => "chat:message",
            Self::ChatHistory { .. } => "chat:history",
            Self::PresenceUpdated { .. } => "presence:updated",
            Self::TeammateOnline { .. } => "teammate:online",
            Self::TeammateOffline { .. } => "teammate:offline",
            Self::VoiceUpdate(_) => "voice:update",
            Self::ChannelJoined { .. } => "channel:joined",
            Self::ChannelLeft { .. } => "channel:left",
            Self::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope: the outer wrapper for every message
// ---------------------------------------------------------------------------

/// The outer wrapper for every message on the wire, in both directions.
///
/// - `seq`: per-connection sequence number assigned by the sender.
/// - `timestamp`: sender's clock in milliseconds.
/// - `channel`: set on server events delivered through a channel
///   subscription, so clients can tell `session:3` chat from `session:4`.
/// - `reply_to`: set on direct replies; holds the request's `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub seq: u64,

    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,

    pub body: T,
}

impl<T> Envelope<T> {
    /// An envelope with no channel and no reply correlation.
    pub fn new(seq: u64, timestamp: u64, body: T) -> Self {
        Self {
            seq,
            timestamp,
            channel: None,
            reply_to: None,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{PaymentState, SessionStatus};

    #[test]
    fn test_client_request_enqueue_json_format() {
        let req = ClientRequest::Enqueue {
            game: "valorant".into(),
            mode: "ranked".into(),
            duration: 60,
            price: 10,
            awaiting_payment: false,
        };
        let json: serde_json::Value = serde_json::to_value(&req).unwrap();

        assert_eq!(json["type"], "Enqueue");
        assert_eq!(json["game"], "valorant");
        assert_eq!(json["duration"], 60);
    }

    #[test]
    fn test_client_request_enqueue_payment_flag_defaults_false() {
        let json = r#"{"type":"Enqueue","game":"g","mode":"m","duration":30,"price":5}"#;
        let req: ClientRequest = serde_json::from_str(json).unwrap();
        assert!(matches!(
            req,
            ClientRequest::Enqueue { awaiting_payment: false, .. }
        ));
    }

    #[test]
    fn test_client_request_join_channel_parses_key() {
        let json = r#"{"type":"JoinChannel","channel":"session:4"}"#;
        let req: ClientRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            ClientRequest::JoinChannel {
                channel: ChannelKey::session(SessionId(4))
            }
        );
    }

    #[test]
    fn test_server_event_match_found_json_format() {
        let session = Session {
            id: SessionId(1),
            client_id: UserId(2),
            teammate_id: Some(UserId(3)),
            game: "valorant".into(),
            mode: "ranked".into(),
            status: SessionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            price: 10,
            duration: 60,
            queue_entry: None,
        };
        let event = ServerEvent::MatchFound { session };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "match:found");
        assert_eq!(json["session"]["status"], "Pending");
        assert_eq!(json["session"]["teammate_id"], 3);
    }

    #[test]
    fn test_server_event_queue_update_is_flattened() {
        let event = ServerEvent::QueueUpdate(QueueSnapshot {
            game: "valorant".into(),
            queue_length: 3,
            estimated_wait_time: 6,
            available_teammate_count: 1,
        });
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "queue:update");
        assert_eq!(json["queue_length"], 3);
        assert_eq!(json["estimated_wait_time"], 6);
        assert_eq!(json["available_teammate_count"], 1);
    }

    #[test]
    fn test_server_event_type_matches_serde_tag() {
        let events = vec![
            ServerEvent::Ack,
            ServerEvent::TeammateOffline { user_id: UserId(1) },
            ServerEvent::Error {
                code: 403,
                message: "not permitted".into(),
            },
            ServerEvent::QueueLeft {
                entry_id: QueueEntryId(1),
                reason: LeaveReason::PaymentFailed,
            },
        ];
        for event in events {
            let json: serde_json::Value = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.event_type());
        }
    }

    #[test]
    fn test_queue_joined_carries_entry() {
        let entry = QueueEntry {
            id: QueueEntryId(8),
            requester_id: UserId(1),
            game: "lol".into(),
            mode: "duo".into(),
            duration: 30,
            price: 5,
            enqueued_at: Utc::now(),
            payment: PaymentState::AwaitingPayment,
        };
        let event = ServerEvent::QueueJoined { entry, position: 2 };
        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: ServerEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_envelope_omits_empty_routing_fields() {
        let envelope = Envelope::new(1, 100, ServerEvent::Ack);
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert!(json.get("channel").is_none());
        assert!(json.get("reply_to").is_none());
        assert_eq!(json["body"]["event"], "ack");
    }

    #[test]
    fn test_envelope_channel_serialized_as_key() {
        let mut envelope = Envelope::new(
            2,
            0,
            ServerEvent::TeammateOffline { user_id: UserId(5) },
        );
        envelope.channel = Some(ChannelKey::Teammates);
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["channel"], "teammates");
    }
}
