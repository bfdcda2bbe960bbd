//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating wire
/// messages.
///
/// `#[derive(thiserror::Error)]` generates the `std::error::Error`
/// implementation; each `#[error("...")]` is the variant's display text.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, wrong
    /// types, or a truncated frame.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded fine but breaks a protocol rule, e.g. a
    /// request sent before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A channel key that doesn't name any known channel kind.
    #[error("invalid channel key: {0:?}")]
    InvalidChannel(String),
}
