//! Bus configuration.

use serde::{Deserialize, Serialize};

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each listener's delivery queue. When a listener falls
    /// this far behind, further events for it are dropped.
    pub listener_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            listener_buffer: 256,
        }
    }
}
