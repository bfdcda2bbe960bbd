//! Unified error type for the Teamup server.

use teamup_bus::BusError;
use teamup_matchmaking::MatchmakingError;
use teamup_protocol::ProtocolError;
use teamup_session::SessionError;
use teamup_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TeamupError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication or session state machine failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// Anything the matchmaking core refused.
    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),
}

#[cfg(test)]
mod tests {
    use teamup_protocol::UserId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let teamup_err: TeamupError = err.into();
        assert!(matches!(teamup_err, TeamupError::Transport(_)));
        assert!(teamup_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let teamup_err: TeamupError = err.into();
        assert!(matches!(teamup_err, TeamupError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AuthFailed("nope".into());
        let teamup_err: TeamupError = err.into();
        assert!(matches!(teamup_err, TeamupError::Session(_)));
    }

    #[test]
    fn test_from_matchmaking_error_keeps_message() {
        let err = MatchmakingError::AlreadyQueued(UserId(3));
        let teamup_err: TeamupError = err.into();
        assert!(matches!(teamup_err, TeamupError::Matchmaking(_)));
        assert!(teamup_err.to_string().contains("already queued"));
    }

    #[test]
    fn test_from_bus_error() {
        let (listener, _rx) = teamup_bus::EventBus::default().register();
        let teamup_err: TeamupError = BusError::UnknownListener(listener).into();
        assert!(matches!(teamup_err, TeamupError::Bus(_)));
    }
}
