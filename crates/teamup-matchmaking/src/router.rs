//! Connection lifecycle: what happens when a verified user connects and
//! when they go away.
//!
//! `connect` registers a bus listener and subscribes it to the user's
//! default channels. The returned [`ConnectionGuard`] undoes all of it.
//! Call [`ConnectionGuard::close`] on a clean shutdown; if the guard is
//! simply dropped (task panicked, socket died) the same cleanup runs on
//! a spawned task. Either way it runs exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use teamup_bus::{ListenerId, ListenerReceiver};
use teamup_protocol::{ChannelKey, Identity};

use crate::{BlockList, Matchmaker, MatchmakingError, Store, VoiceProvisioner};

/// Keeps a connection's registration alive. Dropping it disconnects.
pub struct ConnectionGuard<S: Store, B: BlockList, V: VoiceProvisioner> {
    matchmaker: Arc<Matchmaker<S, B, V>>,
    identity: Identity,
    listener: ListenerId,
    closed: AtomicBool,
}

impl<S: Store, B: BlockList, V: VoiceProvisioner> ConnectionGuard<S, B, V> {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    /// Disconnects now and waits for the cleanup to finish.
    pub async fn close(self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.matchmaker.disconnect(&self.identity, self.listener).await;
        }
    }
}

impl<S: Store, B: BlockList, V: VoiceProvisioner> Drop for ConnectionGuard<S, B, V> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let matchmaker = Arc::clone(&self.matchmaker);
        let identity = self.identity.clone();
        let listener = self.listener;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    matchmaker.disconnect(&identity, listener).await;
                });
            }
            Err(_) => {
                // No runtime left to run the async part; at least keep the
                // in-memory state truthful.
                matchmaker.bus.remove_listener(listener);
                if identity.is_teammate() {
                    matchmaker.presence.detach(identity.user_id);
                }
                tracing::warn!(user_id = %identity.user_id, "connection dropped outside a runtime");
            }
        }
    }
}

impl<S: Store, B: BlockList, V: VoiceProvisioner> Matchmaker<S, B, V> {
    /// Registers a connection for a verified identity.
    ///
    /// Subscribes `user:<id>`, and for teammates `teammates` and
    /// `teammates:<game>`. A teammate is marked online, which may match a
    /// waiting client straight away. A teammate may hold several
    /// connections and stays online until the last one closes.
    pub async fn connect(
        self: &Arc<Self>,
        identity: Identity,
    ) -> Result<(ConnectionGuard<S, B, V>, ListenerReceiver), MatchmakingError> {
        let (listener, receiver) = self.bus.register();
        let guard = ConnectionGuard {
            matchmaker: Arc::clone(self),
            identity,
            listener,
            closed: AtomicBool::new(false),
        };
        let identity = &guard.identity;

        self.bus.subscribe(listener, ChannelKey::user(identity.user_id))?;
        if let Some(game) = identity.teammate_game() {
            self.bus.subscribe(listener, ChannelKey::Teammates)?;
            self.bus.subscribe(listener, ChannelKey::teammates_of(game))?;
            let transition = self.presence.attach(identity.user_id, game);
            self.mark_online(identity.user_id, game, transition).await;
        }

        tracing::info!(
            user_id = %identity.user_id,
            %listener,
            teammate = identity.is_teammate(),
            "connected"
        );
        Ok((guard, receiver))
    }

    /// Tears down a connection. Called by [`ConnectionGuard`] only.
    ///
    /// Drops the listener, then for teammates closes one of their
    /// connections. Closing the last one flips presence offline, persists
    /// it with retries, and announces `teammate:offline`.
    pub(crate) async fn disconnect(&self, identity: &Identity, listener: ListenerId) {
        self.bus.remove_listener(listener);
        if identity.is_teammate() {
            let transition = self.presence.detach(identity.user_id);
            self.mark_offline(identity.user_id, transition).await;
        }
        tracing::info!(user_id = %identity.user_id, %listener, "disconnected");
    }
}
