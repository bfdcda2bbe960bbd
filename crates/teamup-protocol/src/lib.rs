//! Wire protocol for Teamup.
//!
//! This crate defines the vocabulary every other crate shares:
//!
//! - **Types** ([`UserId`], [`Session`], [`QueueEntry`], [`Identity`], ...):
//!   the entities of the matchmaking core.
//! - **Channels** ([`ChannelKey`]): names of fan-out groups.
//! - **Messages** ([`ClientRequest`], [`ServerEvent`], [`Envelope`]):
//!   what travels over a connection.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes ↔ messages.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Matchmaking (sessions, queue)
//! ```

mod channel;
mod codec;
mod error;
mod message;
mod types;

pub use channel::ChannelKey;
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{ClientRequest, Envelope, LeaveReason, ServerEvent};
pub use types::{
    ChatMessage, Identity, MessageId, Participant, PaymentState,
    PresenceRecord, QueueEntry, QueueEntryId, QueueSnapshot, Role, Session,
    SessionId, SessionStatus, UserId, VoiceChannel,
};
