//! Session chat: persist, then publish on `session:<id>`.
//!
//! Persist-and-publish runs under a per-session lock, so subscribers see
//! messages in exactly the order they were stored. Different sessions
//! never wait on each other. The session's status is read under that
//! lock too, and ending a session takes it, so the last message always
//! lands before the session closes.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use teamup_bus::EventBus;
use teamup_protocol::{ChannelKey, ChatMessage, MessageId, ServerEvent, Session, SessionId, UserId};
use teamup_session::SessionError;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{MatchmakingError, Store};

/// Relays chat within sessions.
#[derive(Debug)]
pub struct ChatRelay {
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    next_id: AtomicU64,
    max_len: usize,
}

impl ChatRelay {
    pub fn new(max_len: usize) -> Self {
        Self {
            locks: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_len,
        }
    }

    /// Stores a message and delivers it to the session's current
    /// subscribers.
    ///
    /// `current` reads the live session. It is awaited only once the
    /// session's chat lock is held, and a terminal transition takes the
    /// same lock, so no message is stored after the session ends.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: no such session
    /// - [`MatchmakingError::NotAuthorized`]: sender isn't a participant
    /// - [`MatchmakingError::SessionClosed`]: session is terminal
    /// - [`MatchmakingError::InvalidInput`]: empty or too long
    /// - [`MatchmakingError::Store`]: persisting failed; nothing was
    ///   published
    pub async fn send_message<S, F>(
        &self,
        store: &S,
        bus: &EventBus,
        session_id: SessionId,
        current: F,
        sender: UserId,
        content: &str,
    ) -> Result<ChatMessage, MatchmakingError>
    where
        S: Store,
        F: Future<Output = Option<Session>>,
    {
        let _turn = self.hold(session_id).await;

        let Some(session) = current.await else {
            self.forget(session_id);
            return Err(SessionError::NotFound(session_id).into());
        };
        if session.status.is_terminal() {
            self.forget(session_id);
        }
        if !session.is_participant(sender) {
            return Err(MatchmakingError::NotAuthorized {
                user: sender,
                action: "chat in this session",
            });
        }
        if session.status.is_terminal() {
            return Err(MatchmakingError::SessionClosed(session_id));
        }
        let content = self.validate(content)?;

        let message = ChatMessage {
            id: MessageId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            session_id,
            sender_id: sender,
            content,
            sent_at: Utc::now(),
        };
        store.put_message(&message).await?;

        let delivered = bus.publish(
            &ChannelKey::session(session_id),
            ServerEvent::ChatMessage {
                message: message.clone(),
            },
        );
        tracing::debug!(%session_id, message_id = %message.id, delivered, "chat relayed");
        Ok(message)
    }

    /// Persisted messages of a session, for its participants.
    pub async fn history<S: Store>(
        &self,
        store: &S,
        session: &Session,
        caller: UserId,
    ) -> Result<Vec<ChatMessage>, MatchmakingError> {
        if !session.is_participant(caller) {
            return Err(MatchmakingError::NotAuthorized {
                user: caller,
                action: "read this chat",
            });
        }
        Ok(store.messages_for(session.id).await?)
    }

    /// Waits for the session's chat lock.
    ///
    /// Sends hold it from the status check through the publish.
    pub async fn hold(&self, session: SessionId) -> OwnedMutexGuard<()> {
        self.lock_for(session).lock_owned().await
    }

    /// Drops the session's lock once it can no longer receive messages.
    pub fn forget(&self, session: SessionId) {
        self.locks.remove(&session);
    }

    /// Number of sessions with a chat lock.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    fn validate(&self, content: &str) -> Result<String, MatchmakingError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(MatchmakingError::InvalidInput("message is empty".into()));
        }
        let len = trimmed.chars().count();
        if len > self.max_len {
            return Err(MatchmakingError::InvalidInput(format!(
                "message is {len} characters, limit is {}",
                self.max_len
            )));
        }
        Ok(trimmed.to_string())
    }

    fn lock_for(&self, session: SessionId) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(session).or_default())
    }
}

#[cfg(test)]
mod tests {
    use teamup_protocol::SessionStatus;

    use super::*;
    use crate::MemoryStore;

    fn session(status: SessionStatus) -> Session {
        Session {
            id: SessionId(1),
            client_id: UserId(1),
            teammate_id: Some(UserId(2)),
            game: "valorant".into(),
            mode: "ranked".into(),
            status,
            start_time: Utc::now(),
            end_time: None,
            price: 10,
            duration: 60,
            queue_entry: None,
        }
    }

    fn live(status: SessionStatus) -> std::future::Ready<Option<Session>> {
        std::future::ready(Some(session(status)))
    }

    #[tokio::test]
    async fn test_send_message_persists_then_publishes() {
        let store = MemoryStore::new();
        let bus = EventBus::default();
        let relay = ChatRelay::new(2000);
        let (listener, mut rx) = bus.register();
        bus.subscribe(listener, ChannelKey::session(SessionId(1))).unwrap();

        let sent = relay
            .send_message(&store, &bus, SessionId(1), live(SessionStatus::Active), UserId(1), "  gg  ")
            .await
            .unwrap();

        assert_eq!(sent.content, "gg");
        assert_eq!(store.messages_for(SessionId(1)).await.unwrap(), vec![sent.clone()]);
        let delivery = rx.try_recv().unwrap();
        assert_eq!(*delivery.event, ServerEvent::ChatMessage { message: sent });
    }

    #[tokio::test]
    async fn test_send_message_outsider_not_authorized() {
        let relay = ChatRelay::new(2000);
        let result = relay
            .send_message(
                &MemoryStore::new(),
                &EventBus::default(),
                SessionId(1),
                live(SessionStatus::Active),
                UserId(3),
                "hi",
            )
            .await;
        assert!(matches!(result, Err(MatchmakingError::NotAuthorized { .. })));
    }

    #[tokio::test]
    async fn test_send_message_terminal_session_closed() {
        let relay = ChatRelay::new(2000);
        let result = relay
            .send_message(
                &MemoryStore::new(),
                &EventBus::default(),
                SessionId(1),
                live(SessionStatus::Completed),
                UserId(1),
                "hi",
            )
            .await;
        assert!(matches!(result, Err(MatchmakingError::SessionClosed(_))));
        assert_eq!(relay.tracked(), 0);
    }

    #[tokio::test]
    async fn test_send_message_unknown_session_leaves_no_lock() {
        let relay = ChatRelay::new(2000);
        let result = relay
            .send_message(
                &MemoryStore::new(),
                &EventBus::default(),
                SessionId(8),
                std::future::ready(None),
                UserId(1),
                "hi",
            )
            .await;
        assert!(matches!(
            result,
            Err(MatchmakingError::Session(SessionError::NotFound(SessionId(8))))
        ));
        assert_eq!(relay.tracked(), 0);
    }

    #[tokio::test]
    async fn test_send_message_reads_status_under_lock() {
        let store = MemoryStore::new();
        let bus = EventBus::default();
        let relay = ChatRelay::new(2000);
        let cell = std::sync::Mutex::new(SessionStatus::Active);
        let status = &cell;

        // The session ends while the send waits for the lock.
        let turn = relay.hold(SessionId(1)).await;
        let send = relay.send_message(
            &store,
            &bus,
            SessionId(1),
            async { Some(session(*status.lock().unwrap())) },
            UserId(1),
            "late",
        );
        let end = async move {
            *status.lock().unwrap() = SessionStatus::Completed;
            drop(turn);
        };
        let (result, ()) = tokio::join!(send, end);

        assert!(matches!(result, Err(MatchmakingError::SessionClosed(_))));
        assert!(store.messages_for(SessionId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_rejects_empty_and_oversized() {
        let store = MemoryStore::new();
        let bus = EventBus::default();
        let relay = ChatRelay::new(5);
        let id = SessionId(1);

        let empty = relay.send_message(&store, &bus, id, live(SessionStatus::Pending), UserId(1), "   ").await;
        let long = relay.send_message(&store, &bus, id, live(SessionStatus::Pending), UserId(1), "123456").await;
        let fits = relay.send_message(&store, &bus, id, live(SessionStatus::Pending), UserId(1), "héllo").await;

        assert!(matches!(empty, Err(MatchmakingError::InvalidInput(_))));
        assert!(matches!(long, Err(MatchmakingError::InvalidInput(_))));
        assert!(fits.is_ok());
        assert_eq!(store.messages_for(SessionId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_participants_only() {
        let store = MemoryStore::new();
        let relay = ChatRelay::new(2000);
        let active = session(SessionStatus::Active);
        relay
            .send_message(&store, &EventBus::default(), active.id, live(SessionStatus::Active), UserId(2), "ready?")
            .await
            .unwrap();

        assert_eq!(relay.history(&store, &active, UserId(1)).await.unwrap().len(), 1);
        assert!(relay.history(&store, &active, UserId(9)).await.is_err());
    }
}
