//! Concurrency properties of the session manager behind a shared lock,
//! the way the matchmaking layer holds it.

use std::sync::Arc;

use teamup_protocol::{SessionStatus, UserId};
use teamup_session::{NewSession, SessionAction, SessionError, SessionManager};
use tokio::sync::Mutex;

fn order(teammate: u64) -> NewSession {
    NewSession {
        client_id: UserId(1),
        teammate_id: UserId(teammate),
        game: "valorant".into(),
        mode: "ranked".into(),
        duration: 60,
        price: 10,
        queue_entry: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_exactly_one_wins() {
    let manager = Arc::new(Mutex::new(SessionManager::new()));
    let id = manager.lock().await.create_pending(order(2)).unwrap().id;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager.lock().await.apply(id, UserId(2), SessionAction::Accept)
        }));
    }

    let mut accepted = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(session) => {
                assert_eq!(session.status, SessionStatus::Active);
                accepted += 1;
            }
            Err(SessionError::InvalidTransition { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(refused, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_never_double_book_teammate() {
    let manager = Arc::new(Mutex::new(SessionManager::new()));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager.lock().await.create_pending(order(2))
        }));
    }

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    let mgr = manager.lock().await;
    assert!(mgr.is_engaged(UserId(2)));
    assert_eq!(mgr.len(), 1);
}

#[tokio::test]
async fn test_every_pending_path_reaches_one_terminal_state() {
    let paths: [&[(u64, SessionAction)]; 4] = [
        &[(2, SessionAction::Reject)],
        &[(1, SessionAction::Cancel)],
        &[(2, SessionAction::Accept), (1, SessionAction::Complete)],
        &[(2, SessionAction::Accept), (2, SessionAction::Cancel)],
    ];

    for path in paths {
        let mut mgr = SessionManager::new();
        let id = mgr.create_pending(order(2)).unwrap().id;
        for &(caller, action) in path {
            mgr.apply(id, UserId(caller), action).unwrap();
        }

        let status = mgr.get(id).unwrap().status;
        assert!(status.is_terminal(), "{path:?} ended in {status}");
        assert!(!mgr.is_engaged(UserId(2)));
    }
}
