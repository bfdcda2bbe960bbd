//! Error types for the bus.

use crate::ListenerId;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The listener was never registered, or has already been removed.
    #[error("listener {0} is not registered")]
    UnknownListener(ListenerId),
}
