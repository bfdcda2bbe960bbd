//! The queue store: waiting requests, one FIFO bucket per game.
//!
//! ```text
//! buckets:      game → Arc<Mutex<Bucket>>     (sorted by enqueued_at, id)
//! by_requester: UserId → QueueEntryId         (one waiting entry per user)
//! games:        QueueEntryId → game           (which bucket to lock)
//! ```
//!
//! The bucket mutex is the serialization point for everything that reads
//! a bucket and then writes it, matching included. The two index maps
//! are only touched while the relevant bucket is locked, so the lock
//! order is always bucket → index.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use teamup_protocol::{PaymentState, QueueEntry, QueueEntryId, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::MatchmakingError;

/// Parameters for [`QueueStore::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub requester_id: UserId,
    pub game: String,
    pub mode: String,
    pub duration: u32,
    pub price: u64,
    pub payment: PaymentState,
}

#[derive(Debug, Default)]
pub(crate) struct Bucket {
    entries: Vec<QueueEntry>,
}

impl Bucket {
    fn insert(&mut self, entry: QueueEntry) {
        let key = (entry.enqueued_at, entry.id);
        let at = self
            .entries
            .partition_point(|e| (e.enqueued_at, e.id) <= key);
        self.entries.insert(at, entry);
    }

    fn remove(&mut self, id: QueueEntryId) -> Option<QueueEntry> {
        let at = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(at))
    }

    fn get(&self, id: QueueEntryId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Default)]
struct QueueIndex {
    by_requester: DashMap<UserId, QueueEntryId>,
    games: DashMap<QueueEntryId, String>,
}

impl QueueIndex {
    fn forget(&self, entry: &QueueEntry) {
        self.by_requester
            .remove_if(&entry.requester_id, |_, id| *id == entry.id);
        self.games.remove(&entry.id);
    }
}

/// All waiting queue entries.
#[derive(Debug)]
pub struct QueueStore {
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    index: QueueIndex,
    next_id: AtomicU64,
}

impl QueueStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            index: QueueIndex::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a waiting entry for `new.requester_id`.
    ///
    /// # Errors
    /// [`MatchmakingError::AlreadyQueued`] if the requester already has a
    /// waiting entry, in any game. The existing entry is left untouched.
    pub async fn enqueue(&self, new: NewEntry) -> Result<QueueEntry, MatchmakingError> {
        let bucket = self.bucket(&new.game);
        let mut bucket = bucket.lock().await;

        let slot = match self.index.by_requester.entry(new.requester_id) {
            Entry::Occupied(_) => return Err(MatchmakingError::AlreadyQueued(new.requester_id)),
            Entry::Vacant(slot) => slot,
        };

        let id = QueueEntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = QueueEntry {
            id,
            requester_id: new.requester_id,
            game: new.game,
            mode: new.mode,
            duration: new.duration,
            price: new.price,
            enqueued_at: Utc::now(),
            payment: new.payment,
        };

        slot.insert(id);
        self.index.games.insert(id, entry.game.clone());
        bucket.insert(entry.clone());

        tracing::debug!(entry_id = %id, requester_id = %entry.requester_id, game = %entry.game, "enqueued");
        Ok(entry)
    }

    /// Removes an entry. Returns `None` if it was already gone.
    pub async fn dequeue(&self, id: QueueEntryId) -> Option<QueueEntry> {
        let mut guard = self.lock_entry(id).await?;
        guard.consume(id)
    }

    /// Every waiting entry of a game, oldest first (ties by id), eligible
    /// or not.
    pub async fn list_waiting(&self, game: &str) -> Vec<QueueEntry> {
        match self.existing_bucket(game) {
            Some(bucket) => bucket.lock().await.entries.clone(),
            None => Vec::new(),
        }
    }

    /// The oldest entry eligible for matching, optionally restricted to
    /// one mode.
    pub async fn peek_oldest(&self, game: &str, mode: Option<&str>) -> Option<QueueEntry> {
        let bucket = self.existing_bucket(game)?;
        let bucket = bucket.lock().await;
        bucket
            .entries
            .iter()
            .find(|e| e.is_eligible() && mode.is_none_or(|m| e.mode == m))
            .cloned()
    }

    pub async fn get(&self, id: QueueEntryId) -> Option<QueueEntry> {
        let guard = self.lock_entry(id).await?;
        guard.get(id).cloned()
    }

    /// The requester's waiting entry, if any.
    pub fn entry_for(&self, requester: UserId) -> Option<QueueEntryId> {
        self.index.by_requester.get(&requester).map(|id| *id)
    }

    /// 1-based position of an entry within its game's queue.
    pub async fn position(&self, id: QueueEntryId) -> Option<usize> {
        let guard = self.lock_entry(id).await?;
        guard.waiting().iter().position(|e| e.id == id).map(|i| i + 1)
    }

    /// Marks an entry's payment as cleared. Returns the updated entry.
    pub async fn settle(&self, id: QueueEntryId) -> Option<QueueEntry> {
        let mut guard = self.lock_entry(id).await?;
        let entry = guard.bucket.entries.iter_mut().find(|e| e.id == id)?;
        entry.payment = PaymentState::Settled;
        Some(entry.clone())
    }

    /// Number of waiting entries in a game.
    pub async fn len(&self, game: &str) -> usize {
        match self.existing_bucket(game) {
            Some(bucket) => bucket.lock().await.entries.len(),
            None => 0,
        }
    }

    /// Total waiting entries across all games.
    pub fn total(&self) -> usize {
        self.index.games.len()
    }

    /// Every game that has ever had a bucket.
    pub fn games(&self) -> Vec<String> {
        let mut games: Vec<String> = self.buckets.iter().map(|b| b.key().clone()).collect();
        games.sort();
        games
    }

    /// The game an entry is waiting in.
    pub fn game_of(&self, id: QueueEntryId) -> Option<String> {
        self.index.games.get(&id).map(|g| g.clone())
    }

    /// Locks a game's bucket for a read-then-write sequence.
    pub(crate) async fn lock(&self, game: &str) -> BucketGuard<'_> {
        let bucket = self.bucket(game).lock_owned().await;
        BucketGuard {
            bucket,
            index: &self.index,
        }
    }

    /// Locks the bucket holding `id`, or `None` if the entry is unknown.
    ///
    /// The entry may vanish between the index lookup and the lock; the
    /// guard's own lookups report that as `None`.
    async fn lock_entry(&self, id: QueueEntryId) -> Option<BucketGuard<'_>> {
        let game = self.game_of(id)?;
        Some(self.lock(&game).await)
    }

    fn bucket(&self, game: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.get(game) {
            return Arc::clone(&bucket);
        }
        Arc::clone(&self.buckets.entry(game.to_string()).or_default())
    }

    fn existing_bucket(&self, game: &str) -> Option<Arc<Mutex<Bucket>>> {
        self.buckets.get(game).map(|b| Arc::clone(&b))
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one game's bucket.
pub(crate) struct BucketGuard<'a> {
    bucket: OwnedMutexGuard<Bucket>,
    index: &'a QueueIndex,
}

impl BucketGuard<'_> {
    pub(crate) fn get(&self, id: QueueEntryId) -> Option<&QueueEntry> {
        self.bucket.get(id)
    }

    pub(crate) fn waiting(&self) -> &[QueueEntry] {
        &self.bucket.entries
    }

    /// Removes an entry from the bucket and both indexes.
    pub(crate) fn consume(&mut self, id: QueueEntryId) -> Option<QueueEntry> {
        let entry = self.bucket.remove(id)?;
        self.index.forget(&entry);
        tracing::debug!(entry_id = %id, game = %entry.game, "dequeued");
        Some(entry)
    }
}
