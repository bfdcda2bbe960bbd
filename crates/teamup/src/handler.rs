//! Per-connection handler: handshake, auth, and request dispatch.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → get Identity
//!   3. Send HandshakeAck, register with the matchmaker
//!   4. Loop: client requests in, bus deliveries out

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use teamup_bus::{Delivery, ListenerId, ListenerReceiver};
use teamup_matchmaking::{
    BlockList, ErrorKind, Matchmaker, MatchmakingError, OrderRequest, Store, VoiceProvisioner,
};
use teamup_protocol::{
    ClientRequest, Codec, Envelope, Identity, LeaveReason, ProtocolError, ServerEvent,
};
use teamup_session::Authenticator;
use teamup_transport::{Connection, WebSocketConnection};
use tokio::time::Instant;

use crate::TeamupError;
use crate::server::{PROTOCOL_VERSION, ServerState};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that sends nothing for this long is dropped. Heartbeats
/// count; outgoing deliveries don't.
const IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C, S, B, V>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C, S, B, V>>,
) -> Result<(), TeamupError>
where
    A: Authenticator,
    C: Codec,
    S: Store,
    B: BlockList,
    V: VoiceProvisioner,
{
    let conn_id = conn.id();
    let start = Instant::now();
    tracing::debug!(%conn_id, peer = ?conn.peer_addr(), "handling new connection");

    // --- Step 1: Handshake ---
    let identity = perform_handshake(&conn, &state, &start).await?;
    let user_id = identity.user_id;
    tracing::info!(%conn_id, %user_id, teammate = identity.is_teammate(), "user authenticated");

    // --- Step 2: Register ---
    // From here on the guard owns cleanup: an early return or a panic
    // still disconnects the user.
    let (guard, deliveries) = state.matchmaker.connect(identity).await?;

    // --- Step 3: Message loop ---
    let mut writer = Writer {
        conn: &conn,
        codec: &state.codec,
        seq: 1,
        start,
    };
    let result = message_loop(
        &conn,
        &state,
        guard.identity(),
        guard.listener(),
        deliveries,
        &mut writer,
    )
    .await;

    guard.close().await;
    let _ = conn.close().await;
    result
}

async fn message_loop<A, C, S, B, V>(
    conn: &WebSocketConnection,
    state: &ServerState<A, C, S, B, V>,
    identity: &Identity,
    listener: ListenerId,
    mut deliveries: ListenerReceiver,
    writer: &mut Writer<'_, C>,
) -> Result<(), TeamupError>
where
    C: Codec,
    S: Store,
    B: BlockList,
    V: VoiceProvisioner,
{
    let user_id = identity.user_id;
    let idle = tokio::time::sleep(IDLE_TIMEOUT);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = &mut idle => {
                tracing::info!(%user_id, "connection timed out");
                return Ok(());
            }

            frame = conn.recv() => {
                let data = match frame {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%user_id, "connection closed cleanly");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(%user_id, error = %e, "recv error");
                        return Ok(());
                    }
                };
                idle.as_mut().reset(Instant::now() + IDLE_TIMEOUT);

                let envelope: Envelope<ClientRequest> = match state.codec.decode(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::debug!(%user_id, error = %e, "failed to decode request");
                        writer.error(None, 400, "malformed request").await?;
                        continue;
                    }
                };

                let request_seq = envelope.seq;
                let accepting = matches!(envelope.body, ClientRequest::Accept { .. });
                let now = writer.now();
                match dispatch(&state.matchmaker, identity, listener, envelope.body, now).await {
                    Ok(Reply::Event(event)) => writer.reply(request_seq, event).await?,
                    Ok(Reply::Close) => return Ok(()),
                    Err(e) => {
                        let (code, message) = translate(&e, accepting);
                        writer.error(Some(request_seq), code, &message).await?;
                    }
                }
            }

            delivery = deliveries.recv() => {
                match delivery {
                    Some(delivery) => writer.forward(delivery).await?,
                    None => {
                        tracing::debug!(%user_id, %listener, "listener detached from bus");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// What to do after a request was handled.
enum Reply {
    Event(ServerEvent),
    Close,
}

/// Routes one request to the matchmaker and picks the direct reply.
///
/// Effects other parties need to see (match:found, session:status, chat)
/// are published on the bus by the matchmaker itself; the reply only
/// confirms the caller's request.
async fn dispatch<S, B, V>(
    matchmaker: &Matchmaker<S, B, V>,
    identity: &Identity,
    listener: ListenerId,
    request: ClientRequest,
    server_time: u64,
) -> Result<Reply, MatchmakingError>
where
    S: Store,
    B: BlockList,
    V: VoiceProvisioner,
{
    let user_id = identity.user_id;

    let event = match request {
        ClientRequest::Handshake { .. } => {
            return Err(MatchmakingError::InvalidInput("already authenticated".into()));
        }

        ClientRequest::Heartbeat { client_time } => ServerEvent::HeartbeatAck {
            client_time,
            server_time,
        },

        ClientRequest::Disconnect { reason } => {
            tracing::info!(%user_id, %reason, "client disconnected");
            return Ok(Reply::Close);
        }

        ClientRequest::Enqueue {
            game,
            mode,
            duration,
            price,
            awaiting_payment,
        } => {
            let order = OrderRequest {
                game,
                mode,
                duration,
                price,
            };
            let outcome = matchmaker.enqueue(identity, order, awaiting_payment).await?;
            ServerEvent::QueueJoined {
                entry: outcome.entry,
                position: outcome.position,
            }
        }

        ClientRequest::LeaveQueue => {
            let entry = matchmaker.leave_queue(user_id).await?;
            ServerEvent::QueueLeft {
                entry_id: entry.id,
                reason: LeaveReason::Requested,
            }
        }

        ClientRequest::QueueStatus { game } => {
            ServerEvent::QueueUpdate(matchmaker.queue_snapshot(&game).await)
        }

        ClientRequest::SetAvailability { online } => ServerEvent::PresenceUpdated {
            record: matchmaker.set_availability(identity, online).await?,
        },

        ClientRequest::DirectOrder {
            teammate_id,
            game,
            mode,
            duration,
            price,
        } => {
            let order = OrderRequest {
                game,
                mode,
                duration,
                price,
            };
            matchmaker
                .place_direct_order(identity, teammate_id, order)
                .await?;
            ServerEvent::Ack
        }

        ClientRequest::Accept { session_id } => {
            matchmaker.accept(session_id, user_id).await?;
            ServerEvent::Ack
        }
        ClientRequest::Reject { session_id } => {
            matchmaker.reject(session_id, user_id).await?;
            ServerEvent::Ack
        }
        ClientRequest::Complete { session_id } => {
            matchmaker.complete(session_id, user_id).await?;
            ServerEvent::Ack
        }
        ClientRequest::Cancel { session_id } => {
            matchmaker.cancel(session_id, user_id).await?;
            ServerEvent::Ack
        }

        ClientRequest::SendMessage {
            session_id,
            content,
        } => {
            matchmaker.send_message(session_id, user_id, &content).await?;
            ServerEvent::Ack
        }

        ClientRequest::ChatHistory { session_id } => ServerEvent::ChatHistory {
            session_id,
            messages: matchmaker.chat_history(session_id, user_id).await?,
        },

        ClientRequest::JoinChannel { channel } => {
            matchmaker
                .join_channel(identity, listener, channel.clone())
                .await?;
            ServerEvent::ChannelJoined { channel }
        }

        ClientRequest::LeaveChannel { channel } => {
            matchmaker.leave_channel(listener, &channel)?;
            ServerEvent::ChannelLeft { channel }
        }

        ClientRequest::JoinVoice { session_id } => {
            ServerEvent::VoiceUpdate(matchmaker.join_voice(session_id, user_id).await?)
        }

        ClientRequest::LeaveVoice { session_id } => {
            ServerEvent::VoiceUpdate(matchmaker.leave_voice(session_id, user_id).await?)
        }
    };

    Ok(Reply::Event(event))
}

/// Maps a matchmaking failure to the code and text the user sees.
///
/// Internal failures are logged here and never leak details.
fn translate(err: &MatchmakingError, accepting: bool) -> (u16, String) {
    match err.kind() {
        ErrorKind::NotAuthorized => (403, "not permitted".into()),
        ErrorKind::InvalidTransition if accepting => (409, "order no longer available".into()),
        ErrorKind::InvalidTransition | ErrorKind::AlreadyQueued => (409, err.to_string()),
        ErrorKind::NotFound => (404, err.to_string()),
        ErrorKind::ConcurrentModification => (409, "already matched".into()),
        ErrorKind::Unavailable => (409, "teammate unavailable".into()),
        ErrorKind::InvalidInput => (400, err.to_string()),
        ErrorKind::Internal => {
            tracing::error!(error = %err, "request failed");
            (500, "internal error".into())
        }
    }
}

/// Performs the initial handshake: receive Handshake, validate, auth, send Ack.
async fn perform_handshake<A, C, S, B, V>(
    conn: &WebSocketConnection,
    state: &ServerState<A, C, S, B, V>,
    start: &Instant,
) -> Result<Identity, TeamupError>
where
    A: Authenticator,
    C: Codec,
{
    let mut writer = Writer {
        conn,
        codec: &state.codec,
        seq: 0,
        start: *start,
    };

    let data = match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: Envelope<ClientRequest> = match state.codec.decode(&data) {
        Ok(envelope) => envelope,
        Err(e) => {
            writer.error(None, 400, "expected Handshake").await?;
            return Err(e.into());
        }
    };
    let request_seq = envelope.seq;

    let (version, token) = match envelope.body {
        ClientRequest::Handshake { version, token } => (version, token),
        _ => {
            writer
                .error(Some(request_seq), 400, "expected Handshake")
                .await?;
            return Err(ProtocolError::InvalidMessage(
                "first message must be Handshake".into(),
            )
            .into());
        }
    };

    if version != PROTOCOL_VERSION {
        writer
            .error(
                Some(request_seq),
                400,
                &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
            )
            .await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let token = token.as_deref().unwrap_or("");
    let identity = match state.auth.authenticate(token).await {
        Ok(identity) => identity,
        Err(e) => {
            writer.error(Some(request_seq), 401, "unauthorized").await?;
            return Err(e.into());
        }
    };

    let ack = ServerEvent::HandshakeAck {
        user_id: identity.user_id,
        teammate: identity.is_teammate(),
        server_time: writer.now(),
    };
    writer.reply(request_seq, ack).await?;

    Ok(identity)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Outgoing side of one connection: stamps sequence numbers and
/// timestamps onto envelopes.
struct Writer<'a, C> {
    conn: &'a WebSocketConnection,
    codec: &'a C,
    seq: u64,
    start: Instant,
}

impl<C: Codec> Writer<'_, C> {
    /// Milliseconds since the connection was accepted.
    fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn envelope<T>(&mut self, body: T) -> Envelope<T> {
        let seq = self.seq;
        self.seq += 1;
        Envelope::new(seq, self.now(), body)
    }

    async fn send<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<(), TeamupError> {
        let bytes = self.codec.encode(envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn reply(&mut self, request_seq: u64, event: ServerEvent) -> Result<(), TeamupError> {
        let mut envelope = self.envelope(event);
        envelope.reply_to = Some(request_seq);
        self.send(&envelope).await
    }

    async fn error(
        &mut self,
        request_seq: Option<u64>,
        code: u16,
        message: &str,
    ) -> Result<(), TeamupError> {
        let mut envelope = self.envelope(ServerEvent::Error {
            code,
            message: message.to_string(),
        });
        envelope.reply_to = request_seq;
        self.send(&envelope).await
    }

    /// Sends a bus delivery, tagged with the channel it arrived on.
    async fn forward(&mut self, delivery: Delivery) -> Result<(), TeamupError> {
        let mut envelope = self.envelope(&*delivery.event);
        envelope.channel = Some(delivery.channel);
        self.send(&envelope).await
    }
}
