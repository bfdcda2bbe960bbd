//! The matchmaking core of Teamup.
//!
//! Clients wait in per-game queues; online teammates are paired with
//! them as soon as one is free. Everything is reachable through
//! [`Matchmaker`], the request API the server dispatches to.
//!
//! # Key types
//!
//! - [`QueueStore`]: waiting entries, FIFO per game
//! - [`PresenceStore`]: which teammates are online
//! - [`Matcher`]: pairs an entry with an idle teammate
//! - [`ChatRelay`] / [`VoiceRegistry`]: in-session chat and voice
//! - [`Matchmaker`]: owns all of the above plus the collaborators
//! - [`ConnectionGuard`]: one connected user; dropping it disconnects
//!
//! Collaborators ([`Store`], [`BlockList`], [`VoiceProvisioner`]) are
//! traits; [`MemoryStore`], [`MemoryBlockList`] and [`MemoryVoice`] are
//! in-memory implementations.

#![allow(async_fn_in_trait)]

mod chat;
mod config;
mod error;
mod matcher;
mod memory;
mod presence;
mod queue;
mod router;
mod service;
pub mod stats;
mod store;
mod voice;

pub use chat::ChatRelay;
pub use config::{MatchmakingConfig, RetryPolicy};
pub use error::{ErrorKind, MatchmakingError};
pub use matcher::Matcher;
pub use memory::{MemoryBlockList, MemoryStore, MemoryVoice};
pub use presence::{PresenceStore, PresenceTransition, persist_with_backoff};
pub use queue::{NewEntry, QueueStore};
pub use router::ConnectionGuard;
pub use service::{EnqueueOutcome, Matchmaker, OrderRequest};
pub use store::{BlockList, Store, StoreError, VoiceProvisioner};
pub use voice::VoiceRegistry;
