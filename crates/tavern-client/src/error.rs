//! Error types for the client.

use tavern_protocol::ProtocolError;
use tavern_transport::TransportError;

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The operation needs an authenticated connection.
    #[error("not joined")]
    NotJoined,

    /// The manager task has exited.
    #[error("connection manager stopped")]
    Stopped,

    /// No token could be obtained.
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
