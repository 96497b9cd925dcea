//! # Tavern
//!
//! Real-time room hub for tabletop sessions.
//!
//! Players connect over WebSocket, authenticate with a bearer token, and
//! land in a room (a table). Everything a player sends is fanned out to the
//! other players at the same table: chat, dice rolls, combat updates. The
//! hub never interprets the payloads; it only cares about `type` and
//! `roomId`.
//!
//! The workspace is layered; this crate ties it together:
//!
//! - [`tavern_transport`] — sockets and the WebSocket upgrade
//! - [`tavern_protocol`] — envelopes, control frames, the JSON codec
//! - [`tavern_session`] — auth handshake and per-socket read/write loops
//! - [`tavern_hub`] — the actor owning clients and rooms
//! - [`tavern_client`] — the reconnecting client-side connection manager
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tavern::prelude::*;
//!
//! # async fn run() -> Result<(), TavernError> {
//! let tokens = StaticTokens::new()
//!     .with_token("secret-1", Subject::player("u1", "Ana"));
//!
//! let server = TavernServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(tokens)
//!     .await?;
//! server.run_until(tokio::signal::ctrl_c()).await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::TavernError;
pub use server::{TavernServer, TavernServerBuilder};

pub use tavern_client;
pub use tavern_hub;
pub use tavern_protocol;
pub use tavern_session;
pub use tavern_transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::{ServerConfig, TavernError, TavernServer, TavernServerBuilder};

    pub use tavern_client::{
        ClientConfig, ConnectionManager, ConnectionState, CredentialsProvider,
        StaticCredentials,
    };
    pub use tavern_hub::{HubConfig, HubHandle, HubStats};
    pub use tavern_protocol::{ClientId, Envelope, MessageKind, RoomId, UserId};
    pub use tavern_session::{
        AuthError, Role, SessionConfig, StaticTokens, Subject, TokenValidator,
    };
    pub use tavern_transport::{UpgradePolicy, WebSocketConnector};
}
