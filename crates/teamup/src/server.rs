//! `TeamupServer` builder and accept loop.
//!
//! This is the entry point for running a Teamup server. It ties the
//! layers together: transport → protocol → matchmaking → bus.

use std::sync::Arc;

use teamup_bus::BusConfig;
use teamup_matchmaking::{BlockList, Matchmaker, MatchmakingConfig, Store, VoiceProvisioner};
use teamup_protocol::{Codec, JsonCodec};
use teamup_session::Authenticator;
use teamup_transport::{Transport, TransportError, WebSocketTransport};

use crate::TeamupError;
use crate::handler::handle_connection;

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A, C, S, B, V> {
    pub(crate) matchmaker: Arc<Matchmaker<S, B, V>>,
    pub(crate) auth: A,
    pub(crate) codec: C,
}

/// Builder for configuring and starting a Teamup server.
///
/// # Example
///
/// ```rust,no_run
/// use teamup::prelude::*;
///
/// # async fn start() -> Result<(), TeamupError> {
/// let server = TeamupServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(DevAuthenticator, MemoryStore::new(), MemoryBlockList::new(), MemoryVoice::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct TeamupServerBuilder {
    bind_addr: String,
    matchmaking: MatchmakingConfig,
    bus: BusConfig,
}

impl TeamupServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            matchmaking: MatchmakingConfig::default(),
            bus: BusConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn matchmaking_config(mut self, config: MatchmakingConfig) -> Self {
        self.matchmaking = config;
        self
    }

    pub fn bus_config(mut self, config: BusConfig) -> Self {
        self.bus = config;
        self
    }

    /// Binds the listener and wires up the matchmaking core with the
    /// given collaborators.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A, S, B, V>(
        self,
        auth: A,
        store: S,
        blocklist: B,
        voice: V,
    ) -> Result<TeamupServer<A, JsonCodec, S, B, V>, TeamupError>
    where
        A: Authenticator,
        S: Store,
        B: BlockList,
        V: VoiceProvisioner,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let matchmaker = Matchmaker::new(self.matchmaking, self.bus, store, blocklist, voice);

        let state = Arc::new(ServerState {
            matchmaker: Arc::new(matchmaker),
            auth,
            codec: JsonCodec,
        });

        Ok(TeamupServer { transport, state })
    }
}

impl Default for TeamupServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Teamup server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct TeamupServer<A, C, S, B, V> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C, S, B, V>>,
}

impl<A, C, S, B, V> TeamupServer<A, C, S, B, V>
where
    A: Authenticator,
    C: Codec,
    S: Store,
    B: BlockList,
    V: VoiceProvisioner,
{
    /// Creates a new builder.
    pub fn builder() -> TeamupServerBuilder {
        TeamupServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The matchmaking core behind this server.
    ///
    /// Out-of-band callers (the payment processor's webhook handler, an
    /// admin tool) drive it through this handle.
    pub fn matchmaker(&self) -> &Arc<Matchmaker<S, B, V>> {
        &self.state.matchmaker
    }

    /// Runs the server accept loop.
    ///
    /// Starts the periodic queue broadcast, then accepts connections and
    /// spawns a handler task for each one. Returns once the transport is
    /// shut down.
    pub async fn run(mut self) -> Result<(), TeamupError> {
        let ticker = self.state.matchmaker.spawn_queue_ticker();
        tracing::info!(addr = ?self.local_addr().ok(), "Teamup server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(TransportError::Shutdown) => break,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        ticker.abort();
        tracing::info!("Teamup server stopped");
        Ok(())
    }
}
