//! The channel registry.
//!
//! Two sharded maps, kept in sync:
//!
//! ```text
//! channels:  ChannelKey  → { ListenerId → Sender }   (who gets a publish)
//! listeners: ListenerId  → { Sender, {ChannelKey} }  (what to undo on removal)
//! ```
//!
//! Both are `DashMap`s, so subscribing to `session:4` never contends
//! with publishing on `queue:valorant` unless the keys share a shard.
//! When both maps are touched, `listeners` is locked before `channels`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use teamup_protocol::{ChannelKey, ServerEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::{BusConfig, BusError};

/// Identifies one registered listener (one per connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L-{}", self.0)
    }
}

/// One event as seen by one listener.
///
/// The event is behind an `Arc`: a `queue:update` fanned out to a
/// thousand watchers is allocated once.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The channel the event was published on.
    pub channel: ChannelKey,
    pub event: Arc<ServerEvent>,
}

/// The receiving half handed out by [`EventBus::register`].
pub type ListenerReceiver = mpsc::Receiver<Delivery>;

struct ListenerEntry {
    sender: mpsc::Sender<Delivery>,
    channels: HashSet<ChannelKey>,
}

/// Channel registry with non-blocking fan-out.
///
/// Delivery is at-most-once with no replay: a listener that subscribes
/// after a publish never sees it.
pub struct EventBus {
    channels: DashMap<ChannelKey, HashMap<ListenerId, mpsc::Sender<Delivery>>>,
    listeners: DashMap<ListenerId, ListenerEntry>,
    next_id: AtomicU64,
    config: BusConfig,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            channels: DashMap::new(),
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Registers a new listener with no subscriptions.
    pub fn register(&self) -> (ListenerId, ListenerReceiver) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.config.listener_buffer.max(1));
        self.listeners.insert(
            id,
            ListenerEntry {
                sender,
                channels: HashSet::new(),
            },
        );
        tracing::debug!(listener = %id, "listener registered");
        (id, receiver)
    }

    /// Subscribes a listener to a channel.
    ///
    /// Returns `true` if the subscription is new, `false` if the listener
    /// was already subscribed.
    pub fn subscribe(&self, listener: ListenerId, channel: ChannelKey) -> Result<bool, BusError> {
        let mut entry = self
            .listeners
            .get_mut(&listener)
            .ok_or(BusError::UnknownListener(listener))?;

        if !entry.channels.insert(channel.clone()) {
            return Ok(false);
        }
        self.channels
            .entry(channel.clone())
            .or_default()
            .insert(listener, entry.sender.clone());

        tracing::debug!(%listener, %channel, "subscribed");
        Ok(true)
    }

    /// Unsubscribes a listener from a channel.
    ///
    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, listener: ListenerId, channel: &ChannelKey) -> Result<bool, BusError> {
        let mut entry = self
            .listeners
            .get_mut(&listener)
            .ok_or(BusError::UnknownListener(listener))?;

        if !entry.channels.remove(channel) {
            return Ok(false);
        }
        self.detach(listener, channel);

        tracing::debug!(%listener, %channel, "unsubscribed");
        Ok(true)
    }

    /// Drops a listener and every subscription it holds.
    ///
    /// Returns `false` if the listener was already gone, which makes this
    /// safe to call from both an explicit close and a drop guard.
    pub fn remove_listener(&self, listener: ListenerId) -> bool {
        let Some((_, entry)) = self.listeners.remove(&listener) else {
            return false;
        };
        for channel in &entry.channels {
            self.detach(listener, channel);
        }
        tracing::debug!(%listener, channels = entry.channels.len(), "listener removed");
        true
    }

    /// Publishes an event to every subscriber of `channel`.
    ///
    /// Never blocks. A subscriber whose queue is full misses this event;
    /// a subscriber whose receiver is gone is removed. Returns how many
    /// listeners received it.
    pub fn publish(&self, channel: &ChannelKey, event: ServerEvent) -> usize {
        // Clone the senders out so no shard lock is held while sending.
        let targets: Vec<(ListenerId, mpsc::Sender<Delivery>)> = match self.channels.get(channel) {
            Some(subscribers) => subscribers
                .iter()
                .map(|(id, sender)| (*id, sender.clone()))
                .collect(),
            None => return 0,
        };

        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (listener, sender) in targets {
            let delivery = Delivery {
                channel: channel.clone(),
                event: Arc::clone(&event),
            };
            match sender.try_send(delivery) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        %listener,
                        %channel,
                        event = event.event_type(),
                        "listener queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(listener),
            }
        }

        for listener in closed {
            tracing::debug!(%listener, "receiver gone, removing listener");
            self.remove_listener(listener);
        }

        tracing::trace!(%channel, event = event.event_type(), delivered, "published");
        delivered
    }

    /// Number of listeners subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &ChannelKey) -> usize {
        self.channels.get(channel).map_or(0, |s| s.len())
    }

    /// The channels a listener is subscribed to, in no particular order.
    pub fn channels_of(&self, listener: ListenerId) -> Vec<ChannelKey> {
        self.listeners
            .get(&listener)
            .map(|entry| entry.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, listener: ListenerId) -> bool {
        self.listeners.contains_key(&listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn detach(&self, listener: ListenerId, channel: &ChannelKey) {
        let now_empty = match self.channels.get_mut(channel) {
            Some(mut subscribers) => {
                subscribers.remove(&listener);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            // Re-checked under the shard lock: someone may have subscribed
            // in between.
            self.channels.remove_if(channel, |_, subscribers| subscribers.is_empty());
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use teamup_protocol::UserId;

    use super::*;

    fn offline(id: u64) -> ServerEvent {
        ServerEvent::TeammateOffline { user_id: UserId(id) }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = EventBus::default();
        let (id, _rx) = bus.register();

        assert!(bus.subscribe(id, ChannelKey::Teammates).unwrap());
        assert!(!bus.subscribe(id, ChannelKey::Teammates).unwrap());
        assert_eq!(bus.subscriber_count(&ChannelKey::Teammates), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_cleans_channel() {
        let bus = EventBus::default();
        let (id, _rx) = bus.register();
        bus.subscribe(id, ChannelKey::Teammates).unwrap();

        assert!(bus.unsubscribe(id, &ChannelKey::Teammates).unwrap());
        assert!(!bus.unsubscribe(id, &ChannelKey::Teammates).unwrap());
        assert_eq!(bus.subscriber_count(&ChannelKey::Teammates), 0);
        assert!(bus.channels.is_empty());
    }

    #[test]
    fn test_subscribe_unknown_listener_fails() {
        let bus = EventBus::default();
        let (id, _rx) = bus.register();
        bus.remove_listener(id);

        let result = bus.subscribe(id, ChannelKey::Teammates);
        assert!(matches!(result, Err(BusError::UnknownListener(l)) if l == id));
    }

    #[test]
    fn test_remove_listener_drops_every_subscription() {
        let bus = EventBus::default();
        let (id, _rx) = bus.register();
        bus.subscribe(id, ChannelKey::Teammates).unwrap();
        bus.subscribe(id, ChannelKey::user(UserId(1))).unwrap();

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        assert_eq!(bus.subscriber_count(&ChannelKey::Teammates), 0);
        assert_eq!(bus.subscriber_count(&ChannelKey::user(UserId(1))), 0);
        assert!(bus.channels_of(id).is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_publish_no_subscribers_delivers_nothing() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(&ChannelKey::Teammates, offline(1)), 0);
    }

    #[test]
    fn test_publish_full_queue_drops_without_blocking() {
        let bus = EventBus::new(BusConfig { listener_buffer: 1 });
        let (id, mut rx) = bus.register();
        bus.subscribe(id, ChannelKey::Teammates).unwrap();

        assert_eq!(bus.publish(&ChannelKey::Teammates, offline(1)), 1);
        assert_eq!(bus.publish(&ChannelKey::Teammates, offline(2)), 0);

        let first = rx.try_recv().unwrap();
        assert_eq!(*first.event, offline(1));
        assert!(rx.try_recv().is_err());
        // Still subscribed: a full queue is not a dead listener.
        assert!(bus.is_registered(id));
    }

    #[test]
    fn test_publish_closed_receiver_removes_listener() {
        let bus = EventBus::default();
        let (id, rx) = bus.register();
        bus.subscribe(id, ChannelKey::Teammates).unwrap();
        drop(rx);

        assert_eq!(bus.publish(&ChannelKey::Teammates, offline(1)), 0);
        assert!(!bus.is_registered(id));
        assert_eq!(bus.subscriber_count(&ChannelKey::Teammates), 0);
    }

    #[test]
    fn test_listener_id_display() {
        let bus = EventBus::default();
        let (id, _rx) = bus.register();
        assert_eq!(id.to_string(), format!("L-{}", id.into_inner()));
    }
}
