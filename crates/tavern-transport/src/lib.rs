//! Transport abstraction layer for Tavern.
//!
//! Provides the [`Transport`], [`PendingConnection`], [`Connection`] and
//! [`Connector`] traits that abstract over the socket so the session and
//! client layers can be driven by in-memory connections in tests.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    PendingWebSocket, UpgradePolicy, WebSocketConnection, WebSocketConnector,
    WebSocketTransport,
};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete UTF-8 text frame.
    Text(String),
    /// A transport-level ping or pong. Carries no data but proves the peer
    /// is alive, so read deadlines restart on it.
    Heartbeat,
}

/// What the client asked for in its upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Remote address of the peer.
    pub peer: SocketAddr,
    /// The `room` query parameter of the upgrade URL, if present and
    /// non-empty.
    pub room: Option<String>,
    /// The `Origin` header, if sent.
    pub origin: Option<String>,
}

/// Accepts new incoming connections.
pub trait Transport: Send + 'static {
    /// An accepted socket that has not finished its upgrade yet.
    type Pending: PendingConnection;

    /// Waits for and accepts the next incoming socket.
    ///
    /// Only the raw accept happens here; the (potentially slow) protocol
    /// upgrade is left to [`PendingConnection::upgrade`] so the caller can
    /// run it on its own task.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Pending, TransportError>> + Send;

    /// Returns the address the transport is bound to.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// An accepted socket awaiting its protocol upgrade.
pub trait PendingConnection: Send + 'static {
    /// The connection type produced by a successful upgrade.
    type Connection: Connection;

    /// Completes the upgrade, returning the connection and what the client
    /// asked for.
    fn upgrade(
        self,
    ) -> impl Future<Output = Result<(Self::Connection, UpgradeRequest), TransportError>>
    + Send;
}

/// A single connection that can send and receive text frames.
///
/// Reads and writes are independent: one task may be parked in
/// [`recv`](Self::recv) while another calls [`send`](Self::send).
pub trait Connection: Send + Sync + 'static {
    /// Sends one text frame to the remote peer.
    fn send(&self, frame: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next inbound frame.
    ///
    /// Returns `Ok(None)` when the connection is closed by the peer.
    fn recv(&self) -> impl Future<Output = Result<Option<Inbound>, TransportError>> + Send;

    /// Sends a transport-level keepalive ping.
    fn ping(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends a close frame and shuts the connection down.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// Opens outbound connections (the client side of [`Transport`]).
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Opens a connection to `url`.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}
