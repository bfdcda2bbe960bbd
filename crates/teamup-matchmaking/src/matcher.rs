//! Pairs a waiting queue entry with an idle online teammate.
//!
//! One `try_match` runs like this:
//!
//! ```text
//! lock bucket(game)
//!   entry still waiting? ── no ──→ ConcurrentModification
//!   entry paid?          ── no ──→ None
//!   candidates = online teammates of game, longest-online first
//!     − the requester themselves
//!     − teammates already holding an open session
//!     − teammates blocked by / blocking the requester
//!   for each candidate:
//!     sessions.create_pending(...)   ← re-checks availability under lock
//!       busy → next candidate
//!       ok   → consume entry, publish match:found, return Session
//! unlock
//! ```
//!
//! The bucket lock is taken before the session manager's lock, never the
//! other way round.

use teamup_bus::EventBus;
use teamup_protocol::{ChannelKey, QueueEntryId, ServerEvent, Session, UserId};
use teamup_session::{NewSession, SessionError, SessionManager};
use tokio::sync::Mutex;

use crate::{BlockList, MatchmakingError, PresenceStore, QueueStore};

/// Borrowed view of everything a match needs.
pub struct Matcher<'a, B> {
    pub queue: &'a QueueStore,
    pub presence: &'a PresenceStore,
    pub sessions: &'a Mutex<SessionManager>,
    pub blocklist: &'a B,
    pub bus: &'a EventBus,
}

impl<B: BlockList> Matcher<'_, B> {
    /// Tries to pair one entry.
    ///
    /// `Ok(None)` means "no teammate right now"; the entry stays queued.
    ///
    /// # Errors
    /// [`MatchmakingError::ConcurrentModification`] if the entry is no
    /// longer waiting (matched, left, or payment failed).
    pub async fn try_match(
        &self,
        entry_id: QueueEntryId,
    ) -> Result<Option<Session>, MatchmakingError> {
        let game = self
            .queue
            .game_of(entry_id)
            .ok_or(MatchmakingError::ConcurrentModification(entry_id))?;
        let mut bucket = self.queue.lock(&game).await;

        let entry = bucket
            .get(entry_id)
            .cloned()
            .ok_or(MatchmakingError::ConcurrentModification(entry_id))?;
        if !entry.is_eligible() {
            tracing::debug!(%entry_id, "entry awaiting payment, not matching");
            return Ok(None);
        }

        let requester = entry.requester_id;
        let mut candidates: Vec<UserId> = self
            .presence
            .list_online_teammates(&game)
            .into_iter()
            .map(|r| r.user_id)
            .filter(|&teammate| teammate != requester)
            .collect();

        {
            let sessions = self.sessions.lock().await;
            candidates.retain(|&teammate| !sessions.is_engaged(teammate));
        }

        let mut allowed = Vec::with_capacity(candidates.len());
        for teammate in candidates {
            if !self.is_blocked(requester, teammate).await {
                allowed.push(teammate);
            }
        }

        let mut sessions = self.sessions.lock().await;
        for teammate in allowed {
            let new = NewSession {
                client_id: requester,
                teammate_id: teammate,
                game: entry.game.clone(),
                mode: entry.mode.clone(),
                duration: entry.duration,
                price: entry.price,
                queue_entry: Some(entry_id),
            };
            match sessions.create_pending(new) {
                Ok(session) => {
                    drop(sessions);
                    bucket.consume(entry_id);
                    drop(bucket);

                    tracing::info!(
                        %entry_id,
                        session_id = %session.id,
                        client_id = %requester,
                        teammate_id = %teammate,
                        "match found"
                    );
                    publish_match(self.bus, &session);
                    return Ok(Some(session));
                }
                Err(SessionError::TeammateBusy(_)) => {
                    tracing::debug!(%entry_id, teammate_id = %teammate, "teammate booked meanwhile");
                }
                Err(SessionError::EntryConsumed(_)) => {
                    return Err(MatchmakingError::ConcurrentModification(entry_id));
                }
                Err(other) => return Err(other.into()),
            }
        }

        tracing::debug!(%entry_id, %game, "no teammate available");
        Ok(None)
    }

    /// Walks a game's waiting entries oldest-first until one matches.
    ///
    /// The oldest eligible entry goes first; the rest of the bucket is
    /// only listed if it can't be placed.
    pub async fn match_waiting(&self, game: &str) -> Result<Option<Session>, MatchmakingError> {
        let Some(oldest) = self.queue.peek_oldest(game, None).await else {
            return Ok(None);
        };
        match self.try_match(oldest.id).await {
            Ok(Some(session)) => return Ok(Some(session)),
            Ok(None) | Err(MatchmakingError::ConcurrentModification(_)) => {}
            Err(e) => return Err(e),
        }

        for entry in self.queue.list_waiting(game).await {
            if entry.id == oldest.id {
                continue;
            }
            if !entry.is_eligible() {
                continue;
            }
            match self.try_match(entry.id).await {
                Ok(Some(session)) => return Ok(Some(session)),
                Ok(None) | Err(MatchmakingError::ConcurrentModification(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// A failing block-list lookup counts as blocked.
    async fn is_blocked(&self, a: UserId, b: UserId) -> bool {
        match self.blocklist.is_blocked(a, b).await {
            Ok(blocked) => blocked,
            Err(e) => {
                tracing::warn!(client_id = %a, teammate_id = %b, error = %e, "block-list lookup failed");
                true
            }
        }
    }
}

/// Tells both parties about a new Pending session on their personal
/// channels.
pub(crate) fn publish_match(bus: &EventBus, session: &Session) {
    for user in session.participants() {
        bus.publish(
            &ChannelKey::user(user),
            ServerEvent::MatchFound {
                session: session.clone(),
            },
        );
    }
}
