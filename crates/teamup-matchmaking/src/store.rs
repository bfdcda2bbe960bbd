//! Seams to the systems this core doesn't own.
//!
//! Persistence, block lists, and voice provisioning live elsewhere. The
//! matchmaker talks to them through these traits; [`crate::memory`] has
//! in-memory versions for tests and the development server.
//!
//! Every method returns `impl Future + Send` so the matchmaker's own
//! futures stay `Send` and can run on spawned tasks.

use std::future::Future;

use teamup_protocol::{
    ChatMessage, PresenceRecord, QueueEntry, QueueEntryId, Session, SessionId, UserId,
};

/// Errors reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend couldn't be reached or refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("voice provisioning failed: {0}")]
    Voice(String),
}

/// The persistent store, addressed by key.
///
/// The in-memory state of the matchmaker is authoritative while the
/// process runs; the store is its durable projection.
pub trait Store: Send + Sync + 'static {
    fn put_queue_entry(&self, entry: &QueueEntry)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    fn remove_queue_entry(
        &self,
        id: QueueEntryId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn put_session(&self, session: &Session) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn put_message(
        &self,
        message: &ChatMessage,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Messages of one session in the order they were stored.
    fn messages_for(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;

    fn put_presence(
        &self,
        record: &PresenceRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn presence(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Option<PresenceRecord>, StoreError>> + Send;
}

/// Who refuses to be matched with whom. Symmetric: `is_blocked(a, b)`
/// must equal `is_blocked(b, a)`.
pub trait BlockList: Send + Sync + 'static {
    fn is_blocked(
        &self,
        a: UserId,
        b: UserId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Creates and tears down the voice channel of a session.
pub trait VoiceProvisioner: Send + Sync + 'static {
    fn create(&self, session: SessionId) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn join(
        &self,
        session: SessionId,
        user: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn leave(
        &self,
        session: SessionId,
        user: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, session: SessionId) -> impl Future<Output = Result<(), StoreError>> + Send;
}
