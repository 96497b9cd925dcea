//! Error types for the session layer.

use tavern_protocol::ProtocolError;
use tavern_transport::TransportError;

/// Errors a [`TokenValidator`](crate::TokenValidator) reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The token is unknown, malformed, or its signature doesn't verify.
    #[error("invalid token")]
    InvalidToken,

    /// The token was valid once but has expired.
    #[error("token expired")]
    Expired,
}

/// Errors that end a session or its handshake.
///
/// Every variant is local to one socket: the hub never sees them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The first frame after `auth_required` was not a valid `auth` frame,
    /// or none arrived before the auth timeout.
    #[error("invalid authentication message")]
    InvalidAuthMessage,

    /// The token validator rejected the presented token.
    #[error("authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    /// The handshake was driven out of order (e.g. run twice).
    #[error("handshake is in state {0}, expected {1}")]
    InvalidState(crate::HandshakeState, crate::HandshakeState),

    /// The hub's command queue is gone (the hub has shut down).
    #[error("hub unavailable")]
    HubUnavailable,

    /// A transport failure on this session's socket.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
