//! Teammate presence: who is online, for which game, since when.
//!
//! Records live in a sharded map and are updated in place with per-key
//! atomicity; the last write wins. Records are never deleted, only
//! flipped offline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use teamup_protocol::{PresenceRecord, UserId};

use crate::{RetryPolicy, Store};

/// What a presence update changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline,
    WentOffline,
    /// Already in the requested state (the timestamp is still refreshed).
    Unchanged,
}

#[derive(Debug)]
struct Presence {
    record: PresenceRecord,
    /// Live connections of the teammate.
    connections: usize,
}

impl Presence {
    fn go_online(&mut self, game: &str, now: DateTime<Utc>) -> PresenceTransition {
        let transition = if self.record.is_online {
            PresenceTransition::Unchanged
        } else {
            PresenceTransition::CameOnline
        };
        self.record.is_online = true;
        self.record.last_seen_at = now;
        self.record.current_game = Some(game.to_string());
        transition
    }

    fn go_offline(&mut self) -> PresenceTransition {
        let transition = if self.record.is_online {
            PresenceTransition::WentOffline
        } else {
            PresenceTransition::Unchanged
        };
        self.record.is_online = false;
        self.record.last_seen_at = Utc::now();
        transition
    }
}

/// In-memory presence records, keyed by teammate.
///
/// Each record also counts the teammate's live connections. Connecting
/// and disconnecting update the count and the online flag in one step,
/// so a disconnect of an old connection can't flip a teammate offline
/// while a newer one is still open.
#[derive(Debug, Default)]
pub struct PresenceStore {
    records: DashMap<UserId, Presence>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a teammate online for `game` and stamps `last_seen_at`.
    pub fn set_online(&self, user: UserId, game: &str) -> PresenceTransition {
        self.update_online(user, game, 0)
    }

    /// Marks a teammate offline and stamps `last_seen_at`.
    ///
    /// Idempotent and infallible; an unknown user is a no-op.
    pub fn set_offline(&self, user: UserId) -> PresenceTransition {
        let Some(mut presence) = self.records.get_mut(&user) else {
            return PresenceTransition::Unchanged;
        };
        let transition = presence.go_offline();
        tracing::debug!(user_id = %user, ?transition, "presence offline");
        transition
    }

    /// Records a new connection and marks the teammate online.
    pub fn attach(&self, user: UserId, game: &str) -> PresenceTransition {
        self.update_online(user, game, 1)
    }

    /// Records a closed connection. The teammate goes offline only when
    /// it was their last one.
    pub fn detach(&self, user: UserId) -> PresenceTransition {
        let Some(mut presence) = self.records.get_mut(&user) else {
            return PresenceTransition::Unchanged;
        };
        presence.connections = presence.connections.saturating_sub(1);
        if presence.connections > 0 {
            tracing::debug!(user_id = %user, connections = presence.connections, "connection closed, still online");
            return PresenceTransition::Unchanged;
        }
        let transition = presence.go_offline();
        tracing::debug!(user_id = %user, ?transition, "last connection closed");
        transition
    }

    /// Live connections of a teammate.
    pub fn connections(&self, user: UserId) -> usize {
        self.records.get(&user).map_or(0, |p| p.connections)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.records.get(&user).is_some_and(|p| p.record.is_online)
    }

    pub fn get(&self, user: UserId) -> Option<PresenceRecord> {
        self.records.get(&user).map(|p| p.record.clone())
    }

    /// Online teammates of `game`, ordered by `(last_seen_at, user_id)`:
    /// whoever has been waiting online longest comes first.
    pub fn list_online_teammates(&self, game: &str) -> Vec<PresenceRecord> {
        let mut online: Vec<PresenceRecord> = self
            .records
            .iter()
            .filter(|p| plays(&p.record, game))
            .map(|p| p.record.clone())
            .collect();
        online.sort_by_key(|r| (r.last_seen_at, r.user_id));
        online
    }

    pub fn online_count(&self, game: &str) -> usize {
        self.records.iter().filter(|p| plays(&p.record, game)).count()
    }

    fn update_online(&self, user: UserId, game: &str, opened: usize) -> PresenceTransition {
        let now = Utc::now();
        let mut presence = self.records.entry(user).or_insert_with(|| Presence {
            record: PresenceRecord {
                user_id: user,
                is_online: false,
                last_seen_at: now,
                current_game: Some(game.to_string()),
            },
            connections: 0,
        });
        presence.connections += opened;
        let transition = presence.go_online(game, now);

        tracing::debug!(user_id = %user, game, ?transition, "presence online");
        transition
    }
}

fn plays(record: &PresenceRecord, game: &str) -> bool {
    record.is_online && record.current_game.as_deref() == Some(game)
}

/// Writes a presence record to the store, retrying with exponential
/// backoff and jitter.
///
/// Returns `true` once a write succeeds, `false` if every attempt failed.
/// The in-memory record is authoritative either way.
pub async fn persist_with_backoff<S: Store>(
    store: &S,
    record: &PresenceRecord,
    policy: &RetryPolicy,
) -> bool {
    let mut delay = policy.initial_delay;
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match store.put_presence(record).await {
            Ok(()) => return true,
            Err(e) if attempt == attempts => {
                tracing::error!(
                    user_id = %record.user_id,
                    attempt,
                    error = %e,
                    "giving up on presence write"
                );
            }
            Err(e) => {
                let jitter = jitter_for(delay);
                tracing::warn!(
                    user_id = %record.user_id,
                    attempt,
                    delay_ms = (delay + jitter).as_millis() as u64,
                    error = %e,
                    "presence write failed, retrying"
                );
                tokio::time::sleep(delay + jitter).await;
                delay = policy.next_delay(delay);
            }
        }
    }
    false
}

/// Up to half of `delay`, uniformly.
fn jitter_for(delay: Duration) -> Duration {
    let max_ms = (delay.as_millis() / 2) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
