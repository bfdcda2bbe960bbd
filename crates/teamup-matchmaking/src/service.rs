//! The request API: every operation a connected user (or the payment
//! processor) can trigger.
//!
//! [`Matchmaker`] owns all in-memory state and the collaborators. Each
//! method validates, mutates, persists, and publishes, in that order. A
//! request's direct result is returned to the caller; everything other
//! parties need to hear about goes out on the bus.
//!
//! # Lock order
//!
//! bucket → session manager, and chat lock → session manager. A
//! transition holds the session's chat lock only while it applies, and
//! releases both before re-matching. A voice slot lock is never held
//! together with the chat lock.

use std::sync::{Arc, Weak};

use chrono::Utc;
use teamup_bus::{BusConfig, EventBus, ListenerId};
use teamup_protocol::{
    ChannelKey, ChatMessage, Identity, LeaveReason, PaymentState, PresenceRecord, QueueEntry,
    QueueEntryId, QueueSnapshot, ServerEvent, Session, SessionId, UserId, VoiceChannel,
};
use teamup_session::{NewSession, SessionAction, SessionError, SessionManager};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::matcher::publish_match;
use crate::presence::{PresenceTransition, persist_with_backoff};
use crate::{
    BlockList, ChatRelay, Matcher, MatchmakingConfig, MatchmakingError, NewEntry, PresenceStore,
    QueueStore, Store, VoiceProvisioner, VoiceRegistry, stats,
};

/// What a client is ordering: from the queue or directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub game: String,
    pub mode: String,
    /// Minutes.
    pub duration: u32,
    pub price: u64,
}

impl OrderRequest {
    fn validate(&self) -> Result<(), MatchmakingError> {
        if self.game.trim().is_empty() {
            return Err(MatchmakingError::InvalidInput("game is required".into()));
        }
        if self.mode.trim().is_empty() {
            return Err(MatchmakingError::InvalidInput("mode is required".into()));
        }
        if self.duration == 0 {
            return Err(MatchmakingError::InvalidInput("duration must be positive".into()));
        }
        Ok(())
    }
}

/// Result of [`Matchmaker::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub entry: QueueEntry,
    /// 1-based position at the time of enqueueing.
    pub position: usize,
    /// Set if the entry was matched straight away.
    pub session: Option<Session>,
}

/// The matchmaking core.
pub struct Matchmaker<S, B, V> {
    pub(crate) config: MatchmakingConfig,
    pub(crate) store: S,
    blocklist: B,
    voice: V,
    pub(crate) bus: EventBus,
    pub(crate) queue: QueueStore,
    pub(crate) presence: PresenceStore,
    sessions: Mutex<SessionManager>,
    chat: ChatRelay,
    voice_rooms: VoiceRegistry,
}

impl<S: Store, B: BlockList, V: VoiceProvisioner> Matchmaker<S, B, V> {
    pub fn new(config: MatchmakingConfig, bus: BusConfig, store: S, blocklist: B, voice: V) -> Self {
        Self {
            chat: ChatRelay::new(config.max_message_len),
            config,
            store,
            blocklist,
            voice,
            bus: EventBus::new(bus),
            queue: QueueStore::new(),
            presence: PresenceStore::new(),
            sessions: Mutex::new(SessionManager::new()),
            voice_rooms: VoiceRegistry::new(),
        }
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blocklist(&self) -> &B {
        &self.blocklist
    }

    pub fn voice(&self) -> &V {
        &self.voice
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn chat(&self) -> &ChatRelay {
        &self.chat
    }

    pub fn voice_rooms(&self) -> &VoiceRegistry {
        &self.voice_rooms
    }

    fn matcher(&self) -> Matcher<'_, B> {
        Matcher {
            queue: &self.queue,
            presence: &self.presence,
            sessions: &self.sessions,
            blocklist: &self.blocklist,
            bus: &self.bus,
        }
    }

    // -----------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------

    /// Puts a client in the queue and tries to match them immediately.
    ///
    /// With `awaiting_payment` the entry holds its place but isn't matched
    /// until [`payment_succeeded`](Self::payment_succeeded).
    pub async fn enqueue(
        &self,
        client: &Identity,
        order: OrderRequest,
        awaiting_payment: bool,
    ) -> Result<EnqueueOutcome, MatchmakingError> {
        if client.is_teammate() {
            return Err(MatchmakingError::NotAuthorized {
                user: client.user_id,
                action: "join the queue as a teammate",
            });
        }
        order.validate()?;

        // The entry goes in held back from matching and only becomes
        // eligible once its store write succeeded.
        let held = self
            .queue
            .enqueue(NewEntry {
                requester_id: client.user_id,
                game: order.game,
                mode: order.mode,
                duration: order.duration,
                price: order.price,
                payment: PaymentState::AwaitingPayment,
            })
            .await?;
        let payment = if awaiting_payment {
            PaymentState::AwaitingPayment
        } else {
            PaymentState::Settled
        };
        let stored = QueueEntry {
            payment,
            ..held.clone()
        };

        if let Err(e) = self.store.put_queue_entry(&stored).await {
            tracing::error!(entry_id = %held.id, error = %e, "failed to persist queue entry, rolling back");
            if self.queue.dequeue(held.id).await.is_some() {
                return Err(e.into());
            }
            // Settled and matched by a payment callback before the
            // rollback got to it: the session stands.
            return match self.matched_before_settling(&stored).await {
                Some(outcome) => Ok(outcome),
                None => Err(e.into()),
            };
        }

        let entry = if awaiting_payment {
            held
        } else {
            match self.queue.settle(held.id).await {
                Some(entry) => entry,
                None => {
                    return self
                        .matched_before_settling(&stored)
                        .await
                        .ok_or(MatchmakingError::NotQueued(client.user_id));
                }
            }
        };

        let position = self.queue.position(entry.id).await.unwrap_or(1);
        tracing::info!(
            entry_id = %entry.id,
            user_id = %client.user_id,
            game = %entry.game,
            position,
            "client queued"
        );
        self.broadcast_queue(&entry.game).await;

        let session = if entry.is_eligible() {
            match self.try_match(entry.id).await {
                Ok(session) => session,
                Err(MatchmakingError::ConcurrentModification(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        Ok(EnqueueOutcome {
            entry,
            position,
            session,
        })
    }

    /// The outcome for an entry that a payment callback matched while
    /// [`enqueue`](Self::enqueue) still held it.
    async fn matched_before_settling(&self, entry: &QueueEntry) -> Option<EnqueueOutcome> {
        let session = self
            .sessions
            .lock()
            .await
            .session_for_entry(entry.id)
            .cloned()?;
        tracing::warn!(entry_id = %entry.id, session_id = %session.id, "entry matched while being queued");
        Some(EnqueueOutcome {
            entry: entry.clone(),
            position: 1,
            session: Some(session),
        })
    }

    /// Removes the caller's waiting entry.
    pub async fn leave_queue(&self, user: UserId) -> Result<QueueEntry, MatchmakingError> {
        let id = self
            .queue
            .entry_for(user)
            .ok_or(MatchmakingError::NotQueued(user))?;
        let entry = self
            .queue
            .dequeue(id)
            .await
            .ok_or(MatchmakingError::NotQueued(user))?;

        self.forget_entry(&entry).await;
        tracing::info!(entry_id = %entry.id, user_id = %user, "client left queue");
        self.broadcast_queue(&entry.game).await;
        Ok(entry)
    }

    /// Runs the matcher for one entry and records the result.
    ///
    /// `Ok(None)` is the normal "nobody free" outcome.
    pub async fn try_match(
        &self,
        entry_id: QueueEntryId,
    ) -> Result<Option<Session>, MatchmakingError> {
        let session = self.matcher().try_match(entry_id).await?;
        if let Some(session) = &session {
            self.record_match(session).await;
        }
        Ok(session)
    }

    /// Tries the game's waiting entries oldest-first until one matches.
    /// Failures are logged; this runs as a side effect of other requests.
    pub async fn rematch(&self, game: &str) -> Option<Session> {
        match self.matcher().match_waiting(game).await {
            Ok(Some(session)) => {
                self.record_match(&session).await;
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(game, error = %e, "re-matching failed");
                None
            }
        }
    }

    async fn record_match(&self, session: &Session) {
        self.persist_session(session).await;
        if let Some(entry) = session.queue_entry {
            if let Err(e) = self.store.remove_queue_entry(entry).await {
                tracing::error!(entry_id = %entry, error = %e, "failed to remove matched entry from store");
            }
        }
        self.broadcast_queue(&session.game).await;
    }

    async fn forget_entry(&self, entry: &QueueEntry) {
        if let Err(e) = self.store.remove_queue_entry(entry.id).await {
            tracing::error!(entry_id = %entry.id, error = %e, "failed to remove queue entry from store");
        }
    }

    // -----------------------------------------------------------------
    // Payment callbacks
    // -----------------------------------------------------------------

    /// The charge behind an entry cleared: make it eligible and match it.
    pub async fn payment_succeeded(
        &self,
        entry_id: QueueEntryId,
    ) -> Result<Option<Session>, MatchmakingError> {
        let entry = self
            .queue
            .settle(entry_id)
            .await
            .ok_or(MatchmakingError::EntryNotFound(entry_id))?;
        if let Err(e) = self.store.put_queue_entry(&entry).await {
            tracing::error!(%entry_id, error = %e, "failed to persist settled entry");
        }
        tracing::info!(%entry_id, "payment settled");

        match self.try_match(entry_id).await {
            Err(MatchmakingError::ConcurrentModification(_)) => Ok(None),
            other => other,
        }
    }

    /// The charge failed: drop the entry as if it was never queued and
    /// tell the requester.
    pub async fn payment_failed(&self, entry_id: QueueEntryId) -> Result<QueueEntry, MatchmakingError> {
        let entry = self
            .queue
            .dequeue(entry_id)
            .await
            .ok_or(MatchmakingError::EntryNotFound(entry_id))?;

        self.forget_entry(&entry).await;
        tracing::info!(%entry_id, user_id = %entry.requester_id, "payment failed, entry removed");
        self.bus.publish(
            &ChannelKey::user(entry.requester_id),
            ServerEvent::QueueLeft {
                entry_id,
                reason: LeaveReason::PaymentFailed,
            },
        );
        self.broadcast_queue(&entry.game).await;
        Ok(entry)
    }

    // -----------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------

    /// Lets a connected teammate go available or unavailable.
    pub async fn set_availability(
        &self,
        teammate: &Identity,
        online: bool,
    ) -> Result<PresenceRecord, MatchmakingError> {
        let game = teammate
            .teammate_game()
            .ok_or(MatchmakingError::NotATeammate(teammate.user_id))?;

        let user = teammate.user_id;
        if online {
            self.mark_online(user, game, self.presence.set_online(user, game)).await;
        } else {
            self.mark_offline(user, self.presence.set_offline(user)).await;
        }

        if let Some(record) = self.presence.get(user) {
            return Ok(record);
        }
        // Never online in this process: fall back to the last stored
        // sighting, if any.
        let last_seen_at = match self.store.presence(user).await {
            Ok(stored) => stored.map(|r| r.last_seen_at),
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "failed to read stored presence");
                None
            }
        };
        Ok(PresenceRecord {
            user_id: user,
            is_online: false,
            last_seen_at: last_seen_at.unwrap_or_else(Utc::now),
            current_game: Some(game.to_string()),
        })
    }

    /// Follows up on a presence update that may have brought `user`
    /// online.
    pub(crate) async fn mark_online(&self, user: UserId, game: &str, transition: PresenceTransition) {
        self.persist_presence(user).await;
        if transition != PresenceTransition::CameOnline {
            return;
        }

        tracing::info!(user_id = %user, game, "teammate online");
        self.bus.publish(
            &ChannelKey::Teammates,
            ServerEvent::TeammateOnline {
                user_id: user,
                game: game.to_string(),
            },
        );
        self.rematch(game).await;
        self.broadcast_queue(game).await;
    }

    /// Follows up on a presence update that may have taken `user`
    /// offline.
    pub(crate) async fn mark_offline(&self, user: UserId, transition: PresenceTransition) {
        self.persist_presence(user).await;
        if transition != PresenceTransition::WentOffline {
            return;
        }

        tracing::info!(user_id = %user, "teammate offline");
        self.bus.publish(
            &ChannelKey::Teammates,
            ServerEvent::TeammateOffline { user_id: user },
        );
        if let Some(game) = self.presence.get(user).and_then(|r| r.current_game) {
            self.broadcast_queue(&game).await;
        }
    }

    async fn persist_presence(&self, user: UserId) {
        if let Some(record) = self.presence.get(user) {
            persist_with_backoff(&self.store, &record, &self.config.presence_retry).await;
        }
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Books a specific teammate, skipping the queue.
    ///
    /// # Errors
    /// [`MatchmakingError::Unavailable`] when the teammate is offline,
    /// busy, blocked, or plays another game.
    pub async fn place_direct_order(
        &self,
        client: &Identity,
        teammate: UserId,
        order: OrderRequest,
    ) -> Result<Session, MatchmakingError> {
        if client.is_teammate() {
            return Err(MatchmakingError::NotAuthorized {
                user: client.user_id,
                action: "place orders as a teammate",
            });
        }
        order.validate()?;
        if teammate == client.user_id {
            return Err(MatchmakingError::Unavailable(teammate));
        }

        let plays_game = self
            .presence
            .get(teammate)
            .is_some_and(|r| r.is_online && r.current_game.as_deref() == Some(order.game.as_str()));
        if !plays_game {
            return Err(MatchmakingError::Unavailable(teammate));
        }
        if self.blocklist.is_blocked(client.user_id, teammate).await? {
            return Err(MatchmakingError::Unavailable(teammate));
        }

        let created = self.sessions.lock().await.create_pending(NewSession {
            client_id: client.user_id,
            teammate_id: teammate,
            game: order.game,
            mode: order.mode,
            duration: order.duration,
            price: order.price,
            queue_entry: None,
        });
        let session = match created {
            Ok(session) => session,
            Err(SessionError::TeammateBusy(t)) => return Err(MatchmakingError::Unavailable(t)),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(session_id = %session.id, client_id = %client.user_id, teammate_id = %teammate, "direct order placed");
        self.persist_session(&session).await;
        publish_match(&self.bus, &session);
        self.broadcast_queue(&session.game).await;
        Ok(session)
    }

    pub async fn accept(&self, session_id: SessionId, caller: UserId) -> Result<Session, MatchmakingError> {
        self.transition(session_id, caller, SessionAction::Accept).await
    }

    pub async fn reject(&self, session_id: SessionId, caller: UserId) -> Result<Session, MatchmakingError> {
        self.transition(session_id, caller, SessionAction::Reject).await
    }

    pub async fn complete(&self, session_id: SessionId, caller: UserId) -> Result<Session, MatchmakingError> {
        self.transition(session_id, caller, SessionAction::Complete).await
    }

    pub async fn cancel(&self, session_id: SessionId, caller: UserId) -> Result<Session, MatchmakingError> {
        self.transition(session_id, caller, SessionAction::Cancel).await
    }

    /// Applies a guarded transition, then announces it.
    pub async fn transition(
        &self,
        session_id: SessionId,
        caller: UserId,
        action: SessionAction,
    ) -> Result<Session, MatchmakingError> {
        // Chat sends check the status under this lock: none lands after
        // the session ends.
        let turn = self.chat.hold(session_id).await;
        let (applied, open) = {
            let mut sessions = self.sessions.lock().await;
            let applied = sessions.apply(session_id, caller, action);
            let open = sessions
                .get(session_id)
                .is_some_and(|s| !s.status.is_terminal());
            (applied, open)
        };
        if !open {
            self.chat.forget(session_id);
        }
        drop(turn);
        let session = applied?;

        self.persist_session(&session).await;
        for user in session.participants() {
            self.bus.publish(
                &ChannelKey::user(user),
                ServerEvent::SessionStatus {
                    session: session.clone(),
                },
            );
        }

        if session.status.is_terminal() {
            match self.voice_rooms.close(&self.voice, session_id).await {
                Ok(true) => {
                    self.bus.publish(
                        &ChannelKey::session(session_id),
                        ServerEvent::VoiceUpdate(VoiceChannel {
                            session_id,
                            members: Vec::new(),
                        }),
                    );
                }
                Ok(false) => {}
                Err(e) => tracing::error!(%session_id, error = %e, "failed to delete voice channel"),
            }
            // The teammate is free again.
            self.rematch(&session.game).await;
            self.broadcast_queue(&session.game).await;
        }
        Ok(session)
    }

    async fn persist_session(&self, session: &Session) {
        if let Err(e) = self.store.put_session(session).await {
            tracing::error!(session_id = %session.id, error = %e, "failed to persist session");
        }
    }

    pub async fn session(&self, session_id: SessionId) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Every session `user` took part in, oldest first.
    pub async fn sessions_for(&self, user: UserId) -> Vec<Session> {
        self.sessions
            .lock()
            .await
            .sessions_for(user)
            .into_iter()
            .cloned()
            .collect()
    }

    async fn existing_session(&self, session_id: SessionId) -> Result<Session, MatchmakingError> {
        self.session(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id).into())
    }

    // -----------------------------------------------------------------
    // Chat & voice
    // -----------------------------------------------------------------

    pub async fn send_message(
        &self,
        session_id: SessionId,
        sender: UserId,
        content: &str,
    ) -> Result<ChatMessage, MatchmakingError> {
        self.chat
            .send_message(
                &self.store,
                &self.bus,
                session_id,
                self.session(session_id),
                sender,
                content,
            )
            .await
    }

    pub async fn chat_history(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<Vec<ChatMessage>, MatchmakingError> {
        let session = self.existing_session(session_id).await?;
        self.chat.history(&self.store, &session, caller).await
    }

    pub async fn join_voice(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<VoiceChannel, MatchmakingError> {
        let channel = self
            .voice_rooms
            .join(&self.voice, session_id, self.session(session_id), user)
            .await?;
        self.bus.publish(
            &ChannelKey::session(session_id),
            ServerEvent::VoiceUpdate(channel.clone()),
        );
        Ok(channel)
    }

    pub async fn leave_voice(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<VoiceChannel, MatchmakingError> {
        let session = self.existing_session(session_id).await?;
        let channel = self.voice_rooms.leave(&self.voice, &session, user).await?;
        self.bus.publish(
            &ChannelKey::session(session_id),
            ServerEvent::VoiceUpdate(channel.clone()),
        );
        Ok(channel)
    }

    // -----------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------

    /// Subscribes a connection to a channel it is allowed to see.
    ///
    /// `queue:<game>` is open to everyone, `user:<id>` only to that user,
    /// `teammates*` only to teammates, `session:<id>` only to the
    /// session's participants.
    pub async fn join_channel(
        &self,
        identity: &Identity,
        listener: ListenerId,
        channel: ChannelKey,
    ) -> Result<bool, MatchmakingError> {
        let allowed = match &channel {
            ChannelKey::Queue(_) => true,
            ChannelKey::User(id) => *id == identity.user_id,
            ChannelKey::Teammates | ChannelKey::TeammatesOf(_) => identity.is_teammate(),
            ChannelKey::Session(id) => self.existing_session(*id).await?.is_participant(identity.user_id),
        };
        if !allowed {
            return Err(MatchmakingError::NotAuthorized {
                user: identity.user_id,
                action: "join this channel",
            });
        }
        Ok(self.bus.subscribe(listener, channel)?)
    }

    pub fn leave_channel(
        &self,
        listener: ListenerId,
        channel: &ChannelKey,
    ) -> Result<bool, MatchmakingError> {
        Ok(self.bus.unsubscribe(listener, channel)?)
    }

    // -----------------------------------------------------------------
    // Queue statistics
    // -----------------------------------------------------------------

    pub async fn queue_snapshot(&self, game: &str) -> QueueSnapshot {
        stats::snapshot(&self.queue, &self.presence, game).await
    }

    /// Publishes the game's snapshot to `queue:<game>` and
    /// `teammates:<game>`.
    pub async fn broadcast_queue(&self, game: &str) {
        let snapshot = self.queue_snapshot(game).await;
        self.bus.publish(
            &ChannelKey::teammates_of(game),
            ServerEvent::QueueUpdate(snapshot.clone()),
        );
        self.bus
            .publish(&ChannelKey::queue(game), ServerEvent::QueueUpdate(snapshot));
    }

    /// Starts the periodic snapshot broadcast.
    ///
    /// The task holds only a weak reference and stops on its own once the
    /// matchmaker is dropped.
    pub fn spawn_queue_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.queue_broadcast_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(matchmaker) = weak.upgrade() else {
                    tracing::debug!("matchmaker dropped, queue ticker stopping");
                    break;
                };
                for game in matchmaker.queue.games() {
                    if matchmaker.queue.len(&game).await > 0 {
                        matchmaker.broadcast_queue(&game).await;
                    }
                }
            }
        })
    }
}
