//! Codec trait and implementations for serializing wire messages.
//!
//! The server never calls `serde_json` directly; it goes through a
//! [`Codec`]. Swapping JSON for a binary format later means adding one
//! more implementation, nothing else.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes Rust values to bytes and decodes bytes back.
///
/// - `Send + Sync + 'static`: the codec is shared by every connection
///   task for the lifetime of the server.
/// - `decode` asks for `DeserializeOwned`: the decoded value owns its
///   data, so the receive buffer can be dropped right after.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` for malformed or mismatched input.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// Readable in browser DevTools, which is what web clients want. Behind
/// the `json` feature (on by default).
///
/// ```rust
/// use teamup_protocol::{ClientRequest, Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let request = Envelope::new(1, 0, ClientRequest::LeaveQueue);
///
/// let bytes = codec.encode(&request).unwrap();
/// let decoded: Envelope<ClientRequest> = codec.decode(&bytes).unwrap();
/// assert_eq!(request, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
