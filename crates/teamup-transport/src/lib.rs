//! Transport abstraction layer for Teamup.
//!
//! The server only needs "accept a connection" and "send/receive a
//! frame". [`Transport`] and [`Connection`] capture exactly that, so the
//! handler doesn't care whether frames arrive over WebSocket or
//! something else.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// The methods are written as `fn ... -> impl Future + Send` rather than
/// `async fn` so the returned futures are guaranteed `Send`: the server
/// drives them from spawned Tokio tasks. Implementors can still write
/// plain `async fn`.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// The address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;

    /// Stops handing out new connections. Existing ones are unaffected.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A single connection that can send and receive frames.
///
/// `send` and `recv` may be called concurrently from the same task (e.g.
/// from two arms of a `tokio::select!`); implementations must not make
/// one wait for the other.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// The remote address, when the transport knows it.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "client");
        map.insert(ConnectionId::new(2), "teammate");
        assert_eq!(map[&ConnectionId::new(2)], "teammate");
    }
}
