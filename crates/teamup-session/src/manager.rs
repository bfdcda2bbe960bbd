//! The session manager: every session ever opened, plus the indexes that
//! keep teammates and queue entries from being double-booked.
//!
//! # Concurrency note
//!
//! `SessionManager` is NOT thread-safe by itself. The matchmaking layer
//! keeps it behind one async mutex; holding that lock across a
//! check-and-insert is what makes [`create_pending`] a compare-and-swap
//! on teammate availability, and what makes two racing `accept` calls
//! resolve to exactly one winner.
//!
//! [`create_pending`]: SessionManager::create_pending

use std::collections::HashMap;

use chrono::Utc;
use teamup_protocol::{QueueEntryId, Session, SessionId, SessionStatus, UserId};

use crate::{NewSession, SessionAction, SessionError};

/// Registry of sessions and their open-session indexes.
///
/// ```text
/// create_pending() ──→ [Pending] ──apply(Accept)──→ [Active]
///                          │                           │
///                          └──apply(Reject/Cancel)──┐  apply(Complete/Cancel)
///                                                   ▼  ▼
///                                        [Cancelled] [Completed]
/// ```
///
/// Terminal sessions are retained; only the `engaged` index forgets them.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,

    /// Teammate → their one Pending/Active session.
    engaged: HashMap<UserId, SessionId>,

    /// Queue entry → the session that consumed it. Never shrinks: an
    /// entry is consumed at most once, ever.
    by_entry: HashMap<QueueEntryId, SessionId>,

    next_id: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a Pending session for `new.teammate_id`.
    ///
    /// The availability check and the insert happen under the same
    /// `&mut self`, so a teammate that was booked between the caller's
    /// own check and this call is refused here.
    ///
    /// # Errors
    /// - [`SessionError::TeammateBusy`]: the teammate holds an open session
    /// - [`SessionError::EntryConsumed`]: the queue entry was already used
    pub fn create_pending(&mut self, new: NewSession) -> Result<Session, SessionError> {
        if self.engaged.contains_key(&new.teammate_id) {
            return Err(SessionError::TeammateBusy(new.teammate_id));
        }
        if let Some(entry) = new.queue_entry {
            if self.by_entry.contains_key(&entry) {
                return Err(SessionError::EntryConsumed(entry));
            }
        }

        self.next_id += 1;
        let id = SessionId(self.next_id);
        let session = Session {
            id,
            client_id: new.client_id,
            teammate_id: Some(new.teammate_id),
            game: new.game,
            mode: new.mode,
            status: SessionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            price: new.price,
            duration: new.duration,
            queue_entry: new.queue_entry,
        };

        self.engaged.insert(new.teammate_id, id);
        if let Some(entry) = new.queue_entry {
            self.by_entry.insert(entry, id);
        }
        self.sessions.insert(id, session.clone());

        tracing::info!(
            session_id = %id,
            client_id = %session.client_id,
            teammate_id = %new.teammate_id,
            game = %session.game,
            "session created"
        );
        Ok(session)
    }

    /// Applies `action` on behalf of `caller` and returns the updated
    /// session.
    ///
    /// Checks run in a fixed order so the error says the most useful
    /// thing: existence, then authorization, then the state guard.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]
    /// - [`SessionError::NotAuthorized`]: caller isn't a participant, or
    ///   their side can't perform `action`
    /// - [`SessionError::InvalidTransition`]: not allowed from the
    ///   current status, or an accept while the teammate is booked
    ///   elsewhere
    pub fn apply(
        &mut self,
        session_id: SessionId,
        caller: UserId,
        action: SessionAction,
    ) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        let authorized = session
            .participant(caller)
            .is_some_and(|side| action.permits(side));
        if !authorized {
            return Err(SessionError::NotAuthorized {
                session: session_id,
                user: caller,
            });
        }

        let from = session.status;
        let to = action.target(from).ok_or(SessionError::InvalidTransition {
            session: session_id,
            status: from,
            action,
        })?;

        if action == SessionAction::Accept {
            if let Some(teammate) = session.teammate_id {
                if self.engaged.get(&teammate).is_some_and(|&open| open != session_id) {
                    return Err(SessionError::InvalidTransition {
                        session: session_id,
                        status: from,
                        action,
                    });
                }
            }
        }

        session.status = to;
        if action.ends_from(from) {
            session.end_time = Some(Utc::now());
        }
        let updated = session.clone();

        if to.is_terminal() {
            if let Some(teammate) = updated.teammate_id {
                if self.engaged.get(&teammate) == Some(&session_id) {
                    self.engaged.remove(&teammate);
                }
            }
        }

        tracing::info!(%session_id, %caller, %action, %from, %to, "session transition");
        Ok(updated)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// The teammate's Pending or Active session, if any.
    pub fn open_session_for(&self, teammate: UserId) -> Option<&Session> {
        self.engaged
            .get(&teammate)
            .and_then(|id| self.sessions.get(id))
    }

    /// Returns `true` if the teammate holds a Pending or Active session.
    pub fn is_engaged(&self, teammate: UserId) -> bool {
        self.engaged.contains_key(&teammate)
    }

    /// Every session `user` took part in, oldest first.
    pub fn sessions_for(&self, user: UserId) -> Vec<&Session> {
        let mut found: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| s.is_participant(user))
            .collect();
        found.sort_by_key(|s| s.id);
        found
    }

    /// The session that consumed a queue entry, if any.
    pub fn session_for_entry(&self, entry: QueueEntryId) -> Option<&Session> {
        self.by_entry.get(&entry).and_then(|id| self.sessions.get(id))
    }

    /// Total number of sessions, terminal ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
