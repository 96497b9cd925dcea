//! Server side of the authentication handshake.
//!
//! ```text
//! Connecting ──send auth_required──→ AwaitingAuth ──valid auth──→ Authenticated
//!                                         │
//!                                         └──bad frame / bad token / timeout──→ Closed
//! ```
//!
//! A socket that has not finished the handshake is never seen by the hub:
//! [`ServerHandshake::run`] only hands back a [`ClientSession`] after
//! `auth_success` has been written to the socket.

use std::fmt;
use std::time::Duration;

use tavern_protocol::{
    Codec, ControlFrame, RoomId, INVALID_AUTH_MESSAGE, INVALID_TOKEN,
};
use tavern_transport::{Connection, Inbound, TransportError};

use crate::{ClientSession, OutboundReceiver, SessionConfig, SessionError, TokenValidator};

/// Where a handshake currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Upgraded, `auth_required` not sent yet.
    Connecting,
    /// `auth_required` sent, waiting for the `auth` frame.
    AwaitingAuth,
    /// `auth_success` sent; the session belongs to the hub now.
    Authenticated,
    /// The handshake failed and the socket was closed.
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The result of a successful handshake: a session ready to register, and
/// the receiving half of its outbound queue for the write loop.
#[derive(Debug)]
pub struct Authenticated {
    pub session: ClientSession,
    pub outbound: OutboundReceiver,
}

/// Drives the handshake on one freshly upgraded connection.
pub struct ServerHandshake<'a, C, V, K> {
    conn: &'a C,
    validator: &'a V,
    codec: &'a K,
    auth_timeout: Duration,
    outbound_capacity: usize,
    upgrade_room: Option<RoomId>,
    state: HandshakeState,
}

impl<'a, C, V, K> ServerHandshake<'a, C, V, K>
where
    C: Connection,
    V: TokenValidator,
    K: Codec,
{
    pub fn new(conn: &'a C, validator: &'a V, codec: &'a K, config: &SessionConfig) -> Self {
        Self {
            conn,
            validator,
            codec,
            auth_timeout: config.auth_timeout,
            outbound_capacity: config.outbound_capacity,
            upgrade_room: None,
            state: HandshakeState::Connecting,
        }
    }

    /// The room named in the upgrade URL. Used when the `auth` frame names
    /// none.
    pub fn with_upgrade_room(mut self, room: Option<RoomId>) -> Self {
        self.upgrade_room = room.and_then(RoomId::non_empty);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Runs the handshake to completion.
    ///
    /// On failure the client has already been sent an `error` frame and the
    /// socket is closed.
    ///
    /// # Errors
    /// - [`SessionError::InvalidAuthMessage`] — no valid `auth` frame in time
    /// - [`SessionError::AuthFailed`] — the validator refused the token
    /// - [`SessionError::InvalidState`] — called more than once
    /// - [`SessionError::Transport`] — the socket failed mid-handshake
    pub async fn run(&mut self) -> Result<Authenticated, SessionError> {
        if self.state != HandshakeState::Connecting {
            return Err(SessionError::InvalidState(
                self.state,
                HandshakeState::Connecting,
            ));
        }

        if let Err(err) = self.send(&ControlFrame::AuthRequired).await {
            self.state = HandshakeState::Closed;
            let _ = self.conn.close().await;
            return Err(err);
        }
        self.state = HandshakeState::AwaitingAuth;

        let (token, auth_room) = match self.read_auth().await {
            Ok(auth) => auth,
            Err(err) => return Err(self.reject(INVALID_AUTH_MESSAGE, err).await),
        };

        let subject = match self.validator.validate(&token) {
            Ok(subject) => subject,
            Err(err) => return Err(self.reject(INVALID_TOKEN, err.into()).await),
        };

        let room = auth_room
            .and_then(RoomId::non_empty)
            .or_else(|| self.upgrade_room.clone());
        let (session, outbound) =
            ClientSession::new(subject, room, self.outbound_capacity);

        let success = ControlFrame::AuthSuccess {
            user_id: session.subject().id.clone(),
            client_id: session.id().clone(),
        };
        if let Err(err) = self.send(&success).await {
            self.state = HandshakeState::Closed;
            let _ = self.conn.close().await;
            return Err(err);
        }

        self.state = HandshakeState::Authenticated;
        tracing::debug!(
            conn = %self.conn.id(),
            client_id = %session.id(),
            user_id = %session.subject().id,
            "handshake complete"
        );
        Ok(Authenticated { session, outbound })
    }

    async fn send(&self, frame: &ControlFrame) -> Result<(), SessionError> {
        let text = self.codec.encode(frame)?;
        self.conn.send(&text).await?;
        Ok(())
    }

    /// Waits for the first text frame and insists it is an `auth` frame.
    async fn read_auth(&self) -> Result<(String, Option<RoomId>), SessionError> {
        let frame = match tokio::time::timeout(self.auth_timeout, self.next_text()).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                return Err(TransportError::ConnectionClosed(
                    "peer closed during handshake".into(),
                )
                .into());
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                tracing::debug!(conn = %self.conn.id(), "auth timed out");
                return Err(SessionError::InvalidAuthMessage);
            }
        };

        match self.codec.decode::<ControlFrame>(&frame) {
            Ok(ControlFrame::Auth { token, room }) => Ok((token, room)),
            Ok(_) | Err(_) => Err(SessionError::InvalidAuthMessage),
        }
    }

    async fn next_text(&self) -> Result<Option<String>, TransportError> {
        loop {
            match self.conn.recv().await? {
                Some(Inbound::Text(text)) => return Ok(Some(text)),
                Some(Inbound::Heartbeat) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Tells the client why, closes the socket, and hands the error back.
    async fn reject(&mut self, message: &str, err: SessionError) -> SessionError {
        tracing::warn!(
            target: "tavern::audit",
            conn = %self.conn.id(),
            error = %err,
            "authentication rejected"
        );
        // The peer may already be gone; the close below is what matters.
        let _ = self.send(&ControlFrame::error(message)).await;
        let _ = self.conn.close().await;
        self.state = HandshakeState::Closed;
        err
    }
}
