//! Queue statistics broadcast on `queue:<game>`.

use teamup_protocol::QueueSnapshot;

use crate::{PresenceStore, QueueStore};

/// Estimated wait in minutes for a queue of `queue_length` entries.
///
/// Two minutes per waiting entry, never less than two. Monotonic in the
/// queue length.
pub fn estimated_wait_minutes(queue_length: usize) -> u32 {
    let minutes = u32::try_from(queue_length)
        .unwrap_or(u32::MAX)
        .saturating_mul(2);
    minutes.max(2)
}

/// The current snapshot for one game.
pub async fn snapshot(queue: &QueueStore, presence: &PresenceStore, game: &str) -> QueueSnapshot {
    let queue_length = queue.len(game).await;
    QueueSnapshot {
        game: game.to_string(),
        queue_length,
        estimated_wait_time: estimated_wait_minutes(queue_length),
        available_teammate_count: presence.online_count(game),
    }
}
