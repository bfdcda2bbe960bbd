//! Which sessions have a live voice channel, and who is in it.
//!
//! The provisioner does the real work; this registry remembers whether a
//! channel was created (so the first join creates it and a terminal
//! transition deletes it) and the member list broadcast as
//! `voice:update`.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use teamup_protocol::{Session, SessionId, UserId, VoiceChannel};
use teamup_session::SessionError;
use tokio::sync::Mutex;

use crate::{MatchmakingError, VoiceProvisioner};

#[derive(Debug, Default)]
struct VoiceSlot {
    provisioned: bool,
    members: Vec<UserId>,
}

/// Voice channel bookkeeping, one slot per session.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    slots: DashMap<SessionId, Arc<Mutex<VoiceSlot>>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `user` to the session's voice channel, creating the channel
    /// on first join. Joining twice is a no-op.
    ///
    /// `current` reads the live session once the slot lock is held.
    /// [`close`](Self::close) runs after a session ends and waits for the
    /// same lock, so a channel created here is always deleted with it.
    pub async fn join<V, F>(
        &self,
        voice: &V,
        session_id: SessionId,
        current: F,
        user: UserId,
    ) -> Result<VoiceChannel, MatchmakingError>
    where
        V: VoiceProvisioner,
        F: Future<Output = Option<Session>>,
    {
        let slot = self.slot(session_id);
        let mut guard = slot.lock().await;

        let live = current.await;
        let checked = match &live {
            Some(session) => check(session, user),
            None => Err(SessionError::NotFound(session_id).into()),
        };
        if live.as_ref().is_none_or(|s| s.status.is_terminal()) && !guard.provisioned {
            self.slots.remove_if(&session_id, |_, s| Arc::ptr_eq(s, &slot));
        }
        checked?;

        if !guard.provisioned {
            voice.create(session_id).await?;
            guard.provisioned = true;
            tracing::info!(%session_id, "voice channel created");
        }
        if !guard.members.contains(&user) {
            voice.join(session_id, user).await?;
            guard.members.push(user);
        }

        Ok(VoiceChannel {
            session_id,
            members: guard.members.clone(),
        })
    }

    /// Removes `user` from the session's voice channel. The channel itself
    /// stays until the session ends.
    pub async fn leave<V: VoiceProvisioner>(
        &self,
        voice: &V,
        session: &Session,
        user: UserId,
    ) -> Result<VoiceChannel, MatchmakingError> {
        if !session.is_participant(user) {
            return Err(MatchmakingError::NotAuthorized {
                user,
                action: "use voice in this session",
            });
        }
        let Some(slot) = self.slots.get(&session.id).map(|s| Arc::clone(&s)) else {
            return Ok(VoiceChannel {
                session_id: session.id,
                members: Vec::new(),
            });
        };
        let mut slot = slot.lock().await;

        if let Some(at) = slot.members.iter().position(|&m| m == user) {
            voice.leave(session.id, user).await?;
            slot.members.remove(at);
        }

        Ok(VoiceChannel {
            session_id: session.id,
            members: slot.members.clone(),
        })
    }

    /// Deletes the channel of a session that has ended. Returns `true` if
    /// one existed.
    pub async fn close<V: VoiceProvisioner>(
        &self,
        voice: &V,
        session: SessionId,
    ) -> Result<bool, MatchmakingError> {
        let Some((_, slot)) = self.slots.remove(&session) else {
            return Ok(false);
        };
        let slot = slot.lock().await;
        if !slot.provisioned {
            return Ok(false);
        }
        voice.delete(session).await?;
        tracing::info!(session_id = %session, "voice channel deleted");
        Ok(true)
    }

    /// The channel's current members, if one was created.
    pub async fn channel(&self, session: SessionId) -> Option<VoiceChannel> {
        let slot = self.slots.get(&session).map(|s| Arc::clone(&s))?;
        let slot = slot.lock().await;
        slot.provisioned.then(|| VoiceChannel {
            session_id: session,
            members: slot.members.clone(),
        })
    }

    /// Number of sessions with a slot.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, session: SessionId) -> Arc<Mutex<VoiceSlot>> {
        Arc::clone(&self.slots.entry(session).or_default())
    }
}

fn check(session: &Session, user: UserId) -> Result<(), MatchmakingError> {
    if !session.is_participant(user) {
        return Err(MatchmakingError::NotAuthorized {
            user,
            action: "use voice in this session",
        });
    }
    if session.status.is_terminal() {
        return Err(MatchmakingError::SessionClosed(session.id));
    }
    Ok(())
}
