//! # Teamup
//!
//! Real-time matchmaking server: clients queue for a game, online
//! teammates are paired with them, and each pairing runs through a
//! session lifecycle with its own chat and voice channel.
//!
//! The server speaks JSON envelopes over WebSocket. The matchmaking core
//! itself lives in `teamup-matchmaking`; this crate adds the transport,
//! the handshake, and request dispatch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use teamup::prelude::*;
//!
//! # async fn start() -> Result<(), TeamupError> {
//! let server = TeamupServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(DevAuthenticator, MemoryStore::new(), MemoryBlockList::new(), MemoryVoice::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::TeamupError;
pub use server::{PROTOCOL_VERSION, TeamupServer, TeamupServerBuilder};

/// Convenience re-exports for building a server and talking to it.
pub mod prelude {
    pub use crate::{PROTOCOL_VERSION, TeamupError, TeamupServer, TeamupServerBuilder};

    pub use teamup_bus::BusConfig;
    pub use teamup_matchmaking::{
        BlockList, Matchmaker, MatchmakingConfig, MatchmakingError, MemoryBlockList, MemoryStore,
        MemoryVoice, RetryPolicy, Store, StoreError, VoiceProvisioner,
    };
    pub use teamup_protocol::{
        ChannelKey, ChatMessage, ClientRequest, Envelope, Identity, LeaveReason, PaymentState,
        PresenceRecord, QueueEntry, QueueEntryId, QueueSnapshot, Role, ServerEvent, Session,
        SessionId, SessionStatus, UserId, VoiceChannel,
    };
    pub use teamup_session::{Authenticator, DevAuthenticator, SessionError};
}
