//! Integration tests for fan-out across listeners and tasks.

use std::sync::Arc;
use std::time::Duration;

use teamup_bus::{BusConfig, EventBus};
use teamup_protocol::{ChannelKey, ServerEvent, SessionId, UserId};

fn online(id: u64) -> ServerEvent {
    ServerEvent::TeammateOnline {
        user_id: UserId(id),
        game: "valorant".into(),
    }
}

#[tokio::test]
async fn test_publish_reaches_only_subscribers_of_that_channel() {
    let bus = EventBus::default();
    let (alice, mut alice_rx) = bus.register();
    let (bob, mut bob_rx) = bus.register();
    bus.subscribe(alice, ChannelKey::session(SessionId(1))).unwrap();
    bus.subscribe(bob, ChannelKey::session(SessionId(2))).unwrap();

    let delivered = bus.publish(&ChannelKey::session(SessionId(1)), ServerEvent::Ack);

    assert_eq!(delivered, 1);
    let delivery = alice_rx.recv().await.unwrap();
    assert_eq!(delivery.channel, ChannelKey::session(SessionId(1)));
    assert_eq!(*delivery.event, ServerEvent::Ack);
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_late_subscriber_gets_no_replay() {
    let bus = EventBus::default();
    let (early, mut early_rx) = bus.register();
    bus.subscribe(early, ChannelKey::Teammates).unwrap();

    bus.publish(&ChannelKey::Teammates, online(1));

    let (late, mut late_rx) = bus.register();
    bus.subscribe(late, ChannelKey::Teammates).unwrap();
    bus.publish(&ChannelKey::Teammates, online(2));

    assert_eq!(*early_rx.recv().await.unwrap().event, online(1));
    assert_eq!(*early_rx.recv().await.unwrap().event, online(2));
    assert_eq!(*late_rx.recv().await.unwrap().event, online(2));
    assert!(late_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_one_listener_many_channels_preserves_publish_order() {
    let bus = EventBus::default();
    let (id, mut rx) = bus.register();
    bus.subscribe(id, ChannelKey::user(UserId(1))).unwrap();
    bus.subscribe(id, ChannelKey::queue("valorant")).unwrap();

    bus.publish(&ChannelKey::user(UserId(1)), online(1));
    bus.publish(&ChannelKey::queue("valorant"), online(2));
    bus.publish(&ChannelKey::user(UserId(1)), online(3));

    let channels: Vec<ChannelKey> = [
        rx.recv().await.unwrap(),
        rx.recv().await.unwrap(),
        rx.recv().await.unwrap(),
    ]
    .into_iter()
    .map(|d| d.channel)
    .collect();

    assert_eq!(
        channels,
        vec![
            ChannelKey::user(UserId(1)),
            ChannelKey::queue("valorant"),
            ChannelKey::user(UserId(1)),
        ]
    );
    let mut subscribed = bus.channels_of(id);
    subscribed.sort_by_key(|c| c.to_string());
    assert_eq!(subscribed.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_and_subscribers() {
    let bus = Arc::new(EventBus::new(BusConfig {
        listener_buffer: 1024,
    }));
    let (watcher, mut watcher_rx) = bus.register();
    bus.subscribe(watcher, ChannelKey::queue("valorant")).unwrap();

    let mut tasks = Vec::new();
    for n in 0..8u64 {
        let bus = Arc::clone(&bus);
        tasks.push(tokio::spawn(async move {
            // Churn subscriptions on unrelated channels while publishing.
            let (id, _rx) = bus.register();
            for i in 0..50u64 {
                bus.subscribe(id, ChannelKey::session(SessionId(i))).unwrap();
                bus.publish(&ChannelKey::queue("valorant"), online(n * 100 + i));
                bus.unsubscribe(id, &ChannelKey::session(SessionId(i))).unwrap();
            }
            bus.remove_listener(id);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut received = 0;
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_millis(50), watcher_rx.recv()).await
    {
        received += 1;
    }
    assert_eq!(received, 8 * 50);
    assert_eq!(bus.listener_count(), 1);
}
