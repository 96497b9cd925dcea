//! Error types for the protocol layer.
//!
//! Each crate in Tavern defines its own error enum. When you see a
//! `ProtocolError`, the problem is in (de)serialization or in the shape of a
//! frame, not in networking or room membership.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into a text frame).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning a text frame into a Rust type).
    ///
    /// Common causes: malformed JSON, missing `type`, wrong field types.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed, but violates protocol rules, e.g. an `auth`
    /// frame arriving where an application envelope was expected.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
