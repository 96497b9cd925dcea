//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    Connection, ConnectionId, Connector, Inbound, PendingConnection,
    Transport, TransportError, UpgradeRequest,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// UpgradePolicy
// ---------------------------------------------------------------------------

/// Rules applied to every incoming upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradePolicy {
    /// The only path that is upgraded. Anything else gets a 404.
    pub path: String,

    /// Accepted `Origin` header values. Empty means any origin (and a
    /// missing header) is accepted.
    pub allowed_origins: Vec<String>,

    /// Largest inbound message or frame, in bytes. Larger frames fail the
    /// read instead of being buffered.
    pub max_frame_size: usize,

    /// How long a client may take to complete the HTTP upgrade.
    pub upgrade_timeout: Duration,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            allowed_origins: Vec::new(),
            max_frame_size: 64 * 1024,
            upgrade_timeout: Duration::from_secs(10),
        }
    }
}

impl UpgradePolicy {
    fn ws_config(&self) -> WebSocketConfig {
        ws_config(self.max_frame_size)
    }

    /// Checks the request line and headers, returning what the client asked
    /// for or the HTTP status to refuse with.
    fn inspect(
        &self,
        request: &Request,
        peer: SocketAddr,
    ) -> Result<UpgradeRequest, (StatusCode, String)> {
        let uri = request.uri();
        if uri.path() != self.path {
            return Err((
                StatusCode::NOT_FOUND,
                format!("no websocket endpoint at {}", uri.path()),
            ));
        }

        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        if !self.allowed_origins.is_empty() {
            let allowed = origin
                .as_deref()
                .is_some_and(|o| self.allowed_origins.iter().any(|a| a == o));
            if !allowed {
                return Err((
                    StatusCode::FORBIDDEN,
                    "origin not allowed".to_string(),
                ));
            }
        }

        let room = uri
            .query()
            .and_then(|query| query_param(query, "room"))
            .filter(|room| !room.is_empty());

        Ok(UpgradeRequest { peer, room, origin })
    }
}

fn ws_config(max_frame_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_size);
    config.max_frame_size = Some(max_frame_size);
    config
}

/// Extracts one `application/x-www-form-urlencoded` query parameter.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    policy: Arc<UpgradePolicy>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(
        addr: &str,
        policy: UpgradePolicy,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, path = %policy.path, "WebSocket transport listening");
        Ok(Self {
            listener,
            policy: Arc::new(policy),
        })
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingWebSocket;

    async fn accept(&mut self) -> Result<PendingWebSocket, TransportError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        Ok(PendingWebSocket {
            stream,
            peer,
            policy: Arc::clone(&self.policy),
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

/// An accepted TCP socket that still has to complete the HTTP upgrade.
pub struct PendingWebSocket {
    stream: TcpStream,
    peer: SocketAddr,
    policy: Arc<UpgradePolicy>,
}

impl PendingConnection for PendingWebSocket {
    type Connection = WebSocketConnection;

    async fn upgrade(
        self,
    ) -> Result<(WebSocketConnection, UpgradeRequest), TransportError> {
        let Self {
            stream,
            peer,
            policy,
        } = self;

        let mut accepted = None;
        let mut refused = None;
        let callback = |request: &Request, response: Response| {
            match policy.inspect(request, peer) {
                Ok(info) => {
                    accepted = Some(info);
                    Ok(response)
                }
                Err((status, reason)) => {
                    let mut error = ErrorResponse::new(Some(reason.clone()));
                    *error.status_mut() = status;
                    refused = Some(reason);
                    Err(error)
                }
            }
        };

        let upgrade = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(policy.ws_config()),
        );
        let result = tokio::time::timeout(policy.upgrade_timeout, upgrade)
            .await
            .map_err(|_| TransportError::TimedOut("websocket upgrade"))?;

        if let Some(reason) = refused {
            tracing::debug!(%peer, %reason, "upgrade refused");
            return Err(TransportError::Rejected(reason));
        }
        let ws = result.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        let request = accepted.ok_or_else(|| {
            TransportError::Rejected("upgrade request was not inspected".into())
        })?;

        let conn = WebSocketConnection::new(ws);
        tracing::debug!(id = %conn.id, %peer, room = ?request.room, "accepted WebSocket connection");
        Ok((conn, request))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A single WebSocket connection.
///
/// The stream is split so the read half and the write half are locked
/// independently; a pending `recv` never holds up `send` or `ping`.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(send_failed)
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        self.send_message(Message::text(frame.to_owned())).await
    }

    async fn recv(&self) -> Result<Option<Inbound>, TransportError> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Inbound::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Ok(Some(Inbound::Text(text))),
                        Err(_) => {
                            tracing::debug!(id = %self.id, "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    return Ok(Some(Inbound::Heartbeat));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.send_message(Message::Ping(Default::default())).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        match sink.send(Message::Close(Some(frame))).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
            Err(e) => return Err(send_failed(e)),
        }
        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(send_failed(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn send_failed(e: WsError) -> TransportError {
    TransportError::SendFailed(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        e,
    ))
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Opens WebSocket connections to a Tavern server.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    max_frame_size: usize,
}

impl WebSocketConnector {
    /// Creates a connector that refuses inbound frames above
    /// `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(UpgradePolicy::default().max_frame_size)
    }
}

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async_with_config(
            url,
            Some(ws_config(self.max_frame_size)),
            false,
        )
        .await
        .map_err(|e| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        let conn = WebSocketConnection::new(ws);
        tracing::debug!(id = %conn.id, url, "opened WebSocket connection");
        Ok(conn)
    }
}
