//! The connection manager: a task that owns the socket and its lifecycle.
//!
//! All mutable state (the socket, the reconnect attempt counter, the single
//! pending retry) lives in [`ManagerActor`], reached only through a command
//! channel. The handle reads state through a `watch` channel and registers
//! callbacks in a shared [`Subscribers`] registry.

use std::future;
use std::sync::Arc;

use serde_json::Value;
use tavern_protocol::{
    Codec, ControlFrame, Envelope, JsonCodec, MessageKind, ProtocolError, RoomId,
};
use tavern_transport::{Connection, Connector, Inbound, TransportError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use crate::subscribers::Subscribers;
use crate::{
    Backoff, ClientConfig, ClientError, ConnectionState, CredentialsProvider, SubscriptionId,
};

enum ManagerCommand {
    Connect {
        room: Option<RoomId>,
    },
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    JoinRoom {
        room: RoomId,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running connection manager.
///
/// Cheap to clone. The manager task stops when the last handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<ManagerCommand>,
    state: watch::Receiver<ConnectionState>,
    subscribers: Arc<Subscribers>,
}

impl ConnectionManager {
    /// Starts a manager in [`ConnectionState::Idle`]. Nothing is opened
    /// until [`connect`](Self::connect).
    pub fn spawn<C, P>(connector: C, credentials: P, config: ClientConfig) -> Self
    where
        C: Connector,
        P: CredentialsProvider,
    {
        let (commands, receiver) = mpsc::channel(64);
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let subscribers = Arc::new(Subscribers::default());

        let actor = ManagerActor {
            connector,
            credentials,
            backoff: config.backoff(),
            config,
            codec: JsonCodec,
            commands: receiver,
            state: state_tx,
            subscribers: Arc::clone(&subscribers),
            conn: None,
            room: None,
            pending_join: None,
            attempt: 0,
            retry_at: None,
        };
        tokio::spawn(actor.run());

        Self {
            commands,
            state,
            subscribers,
        }
    }

    /// Opens a connection and authenticates into `room` (or no room).
    ///
    /// Cancels any scheduled retry and resets the attempt counter. Returns
    /// once the request is queued; watch the state for the outcome.
    pub async fn connect(&self, room: Option<RoomId>) -> Result<(), ClientError> {
        self.command(ManagerCommand::Connect { room }).await
    }

    /// Sends an application envelope. Only allowed while joined.
    ///
    /// Handshake kinds (`auth`, `error`, …) are refused with
    /// [`ProtocolError::InvalidMessage`].
    pub async fn send(&self, kind: impl Into<MessageKind>, data: Value) -> Result<(), ClientError> {
        let kind = kind.into();
        if kind.is_protocol() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{kind} is reserved for the handshake"
            ))
            .into());
        }
        let (reply, result) = oneshot::channel();
        let envelope = Envelope::new(kind, data);
        self.command(ManagerCommand::Send { envelope, reply }).await?;
        result.await.map_err(|_| ClientError::Stopped)?
    }

    /// Moves to `room`. While joined this is sent right away; otherwise it
    /// is remembered and sent after the next `auth_success`.
    pub async fn join_room(&self, room: impl Into<RoomId>) -> Result<(), ClientError> {
        let (reply, result) = oneshot::channel();
        let room = room.into();
        self.command(ManagerCommand::JoinRoom { room, reply }).await?;
        result.await.map_err(|_| ClientError::Stopped)?
    }

    /// Calls `callback` for every envelope of type `kind` received while
    /// joined.
    pub fn subscribe<F>(&self, kind: impl Into<MessageKind>, callback: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(kind.into(), Arc::new(callback))
    }

    /// Calls `callback` on every state change.
    pub fn on_state<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.subscribers.on_state(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver that sees every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the state satisfies `predicate` and returns it.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ConnectionState, ClientError>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| ClientError::Stopped)?;
        Ok(state.clone())
    }

    /// Closes the connection on purpose: no reconnect follows, any pending
    /// retry is cancelled and every subscription is dropped. Ends in
    /// [`ConnectionState::Idle`]. Safe to call repeatedly.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (done, finished) = oneshot::channel();
        if self
            .commands
            .send(ManagerCommand::Disconnect { done })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = finished.await;
        Ok(())
    }

    async fn command(&self, cmd: ManagerCommand) -> Result<(), ClientError> {
        self.commands.send(cmd).await.map_err(|_| ClientError::Stopped)
    }
}

struct ManagerActor<C: Connector, P> {
    connector: C,
    credentials: P,
    config: ClientConfig,
    backoff: Backoff,
    codec: JsonCodec,
    commands: mpsc::Receiver<ManagerCommand>,
    state: watch::Sender<ConnectionState>,
    subscribers: Arc<Subscribers>,
    conn: Option<Arc<C::Connection>>,
    /// Room named in the `auth` frame on every (re)connect.
    room: Option<RoomId>,
    /// A `join_room` asked for while not joined.
    pending_join: Option<RoomId>,
    attempt: u32,
    /// The one scheduled reconnect, if any.
    retry_at: Option<Instant>,
}

impl<C, P> ManagerActor<C, P>
where
    C: Connector,
    P: CredentialsProvider,
{
    async fn run(mut self) {
        loop {
            let conn = self.conn.clone();
            let retry_at = self.retry_at;

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                inbound = next_inbound(conn.as_deref()) => {
                    self.handle_inbound(inbound).await;
                }
                () = sleep_until(retry_at) => {
                    self.retry_at = None;
                    self.open().await;
                }
            }
        }

        self.drop_connection().await;
        tracing::debug!("connection manager stopped");
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Connect { room } => {
                self.retry_at = None;
                self.drop_connection().await;
                self.room = room.and_then(RoomId::non_empty);
                self.attempt = 0;
                self.open().await;
            }
            ManagerCommand::Send { envelope, reply } => {
                let _ = reply.send(self.send_envelope(&envelope).await);
            }
            ManagerCommand::JoinRoom { room, reply } => {
                self.room = Some(room.clone());
                let result = if self.is_joined() {
                    self.send_envelope(&join_envelope(room)).await
                } else {
                    tracing::debug!(room_id = %room, "not joined, queueing join_room");
                    self.pending_join = Some(room);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            ManagerCommand::Disconnect { done } => {
                self.retry_at = None;
                self.pending_join = None;
                self.attempt = 0;
                if self.conn.is_some() {
                    self.set_state(ConnectionState::Closing);
                    self.drop_connection().await;
                }
                self.set_state(ConnectionState::Idle);
                self.subscribers.clear();
                let _ = done.send(());
            }
        }
    }

    async fn open(&mut self) {
        self.set_state(ConnectionState::Connecting);

        let connect = self.connector.connect(&self.config.url);
        match time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(conn)) => {
                tracing::debug!(url = %self.config.url, conn = %conn.id(), "socket open");
                self.conn = Some(Arc::new(conn));
                self.set_state(ConnectionState::AwaitingAuth);
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %self.config.url, error = %e, "connect failed");
                self.schedule_reconnect();
            }
            Err(_) => {
                tracing::warn!(url = %self.config.url, "connect timed out");
                self.schedule_reconnect();
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Result<Option<Inbound>, TransportError>) {
        match inbound {
            Ok(Some(Inbound::Text(text))) => self.handle_frame(&text).await,
            Ok(Some(Inbound::Heartbeat)) => {}
            Ok(None) => {
                tracing::info!("server closed the connection");
                self.connection_lost();
            }
            Err(e) => {
                tracing::info!(error = %e, "connection lost");
                self.connection_lost();
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        let envelope: Envelope = match self.codec.decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match envelope.kind {
            MessageKind::AuthRequired => self.authenticate().await,
            MessageKind::AuthSuccess => match self.codec.decode::<ControlFrame>(text) {
                Ok(ControlFrame::AuthSuccess { user_id, client_id }) => {
                    self.attempt = 0;
                    tracing::info!(%client_id, %user_id, "joined");
                    self.set_state(ConnectionState::Joined { client_id, user_id });
                    self.replay_join().await;
                }
                _ => tracing::debug!("malformed auth_success"),
            },
            MessageKind::Error => {
                let message = match self.codec.decode::<ControlFrame>(text) {
                    Ok(ControlFrame::Error { message }) => message,
                    _ => String::new(),
                };
                tracing::warn!(%message, "server reported an error");
                self.credentials.refresh().await;
            }
            MessageKind::Auth => tracing::debug!("ignoring auth frame from server"),
            _ if self.is_joined() => {
                if self.subscribers.route(&envelope) == 0 {
                    tracing::debug!(kind = %envelope.kind, "no subscriber for frame");
                }
            }
            _ => tracing::debug!(kind = %envelope.kind, "frame before auth_success, ignoring"),
        }
    }

    /// Answers `auth_required`. Never sent unsolicited.
    async fn authenticate(&mut self) {
        if !matches!(*self.state.borrow(), ConnectionState::AwaitingAuth) {
            tracing::debug!("unexpected auth_required, ignoring");
            return;
        }

        let token = match self.credentials.token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "no token to authenticate with");
                self.drop_connection().await;
                self.schedule_reconnect();
                return;
            }
        };

        let frame = ControlFrame::Auth {
            token,
            room: self.room.clone(),
        };
        if let Err(e) = self.send_frame(&frame).await {
            tracing::warn!(error = %e, "failed to send auth");
            self.drop_connection().await;
            self.schedule_reconnect();
        }
    }

    async fn replay_join(&mut self) {
        let Some(room) = self.pending_join.take() else {
            return;
        };
        if let Err(e) = self.send_envelope(&join_envelope(room.clone())).await {
            tracing::warn!(room_id = %room, error = %e, "failed to replay join_room");
            self.pending_join = Some(room);
        }
    }

    fn connection_lost(&mut self) {
        self.conn = None;
        self.schedule_reconnect();
    }

    /// Fills the single retry slot, or gives up once attempts run out.
    fn schedule_reconnect(&mut self) {
        self.attempt = self.attempt.saturating_add(1);

        if !self.backoff.allows(self.attempt) {
            self.retry_at = None;
            tracing::warn!(
                attempts = self.backoff.max_attempts,
                "reconnect attempts exhausted"
            );
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        let delay = self.backoff.delay(self.attempt);
        self.retry_at = Some(Instant::now() + delay);
        tracing::info!(attempt = self.attempt, ?delay, "scheduling reconnect");
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.attempt,
            delay,
        });
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), ClientError> {
        if !self.is_joined() {
            return Err(ClientError::NotJoined);
        }
        let text = self.codec.encode(envelope)?;
        self.send_text(&text).await
    }

    async fn send_frame(&self, frame: &ControlFrame) -> Result<(), ClientError> {
        let text = self.codec.encode(frame)?;
        self.send_text(&text).await
    }

    async fn send_text(&self, text: &str) -> Result<(), ClientError> {
        let conn = self.conn.as_ref().ok_or(ClientError::NotJoined)?;
        conn.send(text).await?;
        Ok(())
    }

    async fn drop_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::trace!(error = %e, "close failed");
            }
        }
    }

    fn is_joined(&self) -> bool {
        self.state.borrow().is_joined()
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!(?state, "connection state");
        self.state.send_replace(state.clone());
        self.subscribers.notify_state(&state);
    }
}

fn join_envelope(room: RoomId) -> Envelope {
    Envelope::new(MessageKind::JoinRoom, Value::Null).in_room(room)
}

async fn next_inbound<T: Connection>(conn: Option<&T>) -> Result<Option<Inbound>, TransportError> {
    match conn {
        Some(conn) => conn.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
