//! In-memory collaborators for tests and the development server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use teamup_protocol::{
    ChatMessage, PresenceRecord, QueueEntry, QueueEntryId, Session, SessionId, UserId,
};

use crate::{BlockList, Store, StoreError, VoiceProvisioner};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A [`Store`] backed by concurrent maps.
///
/// Failure injection: [`fail_next_presence_writes`] and
/// [`fail_queue_writes`] make the next writes return
/// [`StoreError::Unavailable`], which is how the retry and rollback paths
/// get exercised. [`delay_queue_writes`] and [`delay_message_writes`]
/// stretch a write out so other requests can land while it is pending.
///
/// [`fail_next_presence_writes`]: MemoryStore::fail_next_presence_writes
/// [`fail_queue_writes`]: MemoryStore::fail_queue_writes
/// [`delay_queue_writes`]: MemoryStore::delay_queue_writes
/// [`delay_message_writes`]: MemoryStore::delay_message_writes
#[derive(Debug, Default)]
pub struct MemoryStore {
    queue: DashMap<QueueEntryId, QueueEntry>,
    sessions: DashMap<SessionId, Session>,
    messages: DashMap<SessionId, Vec<ChatMessage>>,
    presence: DashMap<UserId, PresenceRecord>,
    presence_failures: AtomicU32,
    presence_attempts: AtomicUsize,
    queue_failing: AtomicBool,
    queue_delay_ms: AtomicU64,
    message_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` presence writes fail.
    pub fn fail_next_presence_writes(&self, n: u32) {
        self.presence_failures.store(n, Ordering::SeqCst);
    }

    /// Makes every queue write fail until switched off.
    pub fn fail_queue_writes(&self, failing: bool) {
        self.queue_failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every queue write take `delay` before it resolves.
    pub fn delay_queue_writes(&self, delay: Duration) {
        self.queue_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes every chat message write take `delay` before it resolves.
    pub fn delay_message_writes(&self, delay: Duration) {
        self.message_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// How many presence writes were attempted, failed ones included.
    pub fn presence_attempts(&self) -> usize {
        self.presence_attempts.load(Ordering::SeqCst)
    }

    pub fn queue_entry(&self, id: QueueEntryId) -> Option<QueueEntry> {
        self.queue.get(&id).map(|e| e.clone())
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn stored_presence(&self, user: UserId) -> Option<PresenceRecord> {
        self.presence.get(&user).map(|r| r.clone())
    }

    fn check_queue(&self) -> Result<(), StoreError> {
        if self.queue_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("queue writes disabled".into()));
        }
        Ok(())
    }
}

async fn pause(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

impl Store for MemoryStore {
    async fn put_queue_entry(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        pause(&self.queue_delay_ms).await;
        self.check_queue()?;
        self.queue.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn remove_queue_entry(&self, id: QueueEntryId) -> Result<(), StoreError> {
        self.check_queue()?;
        self.queue.remove(&id);
        Ok(())
    }

    async fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn put_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        pause(&self.message_delay_ms).await;
        self.messages
            .entry(message.session_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages_for(&self, session: SessionId) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .get(&session)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn put_presence(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        self.presence_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .presence_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("presence write rejected".into()));
        }
        self.presence.insert(record.user_id, record.clone());
        Ok(())
    }

    async fn presence(&self, user: UserId) -> Result<Option<PresenceRecord>, StoreError> {
        Ok(self.stored_presence(user))
    }
}

// ---------------------------------------------------------------------------
// MemoryBlockList
// ---------------------------------------------------------------------------

/// A symmetric [`BlockList`]. Pairs are stored lowest id first.
#[derive(Debug, Default)]
pub struct MemoryBlockList {
    pairs: DashSet<(UserId, UserId)>,
}

impl MemoryBlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, a: UserId, b: UserId) {
        self.pairs.insert(ordered(a, b));
    }

    pub fn unblock(&self, a: UserId, b: UserId) {
        self.pairs.remove(&ordered(a, b));
    }
}

fn ordered(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl BlockList for MemoryBlockList {
    async fn is_blocked(&self, a: UserId, b: UserId) -> Result<bool, StoreError> {
        Ok(self.pairs.contains(&ordered(a, b)))
    }
}

// ---------------------------------------------------------------------------
// MemoryVoice
// ---------------------------------------------------------------------------

/// A [`VoiceProvisioner`] that records which channels exist and who is
/// connected to them.
#[derive(Debug, Default)]
pub struct MemoryVoice {
    channels: DashMap<SessionId, HashSet<UserId>>,
}

impl MemoryVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_provisioned(&self, session: SessionId) -> bool {
        self.channels.contains_key(&session)
    }

    pub fn connected(&self, session: SessionId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .channels
            .get(&session)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}

impl VoiceProvisioner for MemoryVoice {
    async fn create(&self, session: SessionId) -> Result<(), StoreError> {
        self.channels.entry(session).or_default();
        Ok(())
    }

    async fn join(&self, session: SessionId, user: UserId) -> Result<(), StoreError> {
        let mut channel = self
            .channels
            .get_mut(&session)
            .ok_or_else(|| StoreError::Voice(format!("no channel for {session}")))?;
        channel.insert(user);
        Ok(())
    }

    async fn leave(&self, session: SessionId, user: UserId) -> Result<(), StoreError> {
        if let Some(mut channel) = self.channels.get_mut(&session) {
            channel.remove(&user);
        }
        Ok(())
    }

    async fn delete(&self, session: SessionId) -> Result<(), StoreError> {
        self.channels.remove(&session);
        Ok(())
    }
}
