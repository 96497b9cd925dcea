//! Unified error type for the Tavern facade.

use tavern_client::ClientError;
use tavern_hub::HubError;
use tavern_protocol::ProtocolError;
use tavern_session::SessionError;
use tavern_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls, so
/// the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TavernError {
    /// A transport-level error (bind, accept, upgrade, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (handshake, auth).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The hub has stopped.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// A client-side connection manager error.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Environment configuration could not be read.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A file (e.g. the token table) could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The token table is not valid JSON.
    #[error("invalid token table: {0}")]
    Tokens(#[from] serde_json::Error),
}
