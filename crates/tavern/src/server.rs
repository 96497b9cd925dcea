//! `TavernServer` builder and accept loop.
//!
//! This is the entry point for running a Tavern hub. It ties together all
//! the layers: transport → protocol → session → hub.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tavern_hub::{spawn_hub, HubHandle};
use tavern_protocol::JsonCodec;
use tavern_session::{SessionConfig, TokenValidator};
use tavern_transport::{Transport, WebSocketTransport};
use tokio::task::JoinSet;
use tokio::time;

use crate::handler::handle_connection;
use crate::{ServerConfig, TavernError};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<V> {
    pub(crate) hub: HubHandle,
    pub(crate) validator: V,
    pub(crate) codec: JsonCodec,
    pub(crate) session: SessionConfig,
}

/// Builder for configuring and starting a Tavern server.
///
/// # Example
///
/// ```rust,ignore
/// let server = TavernServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(my_validator)
///     .await?;
/// server.run().await
/// ```
pub struct TavernServerBuilder {
    config: ServerConfig,
}

impl TavernServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Binds the listener and starts the hub.
    pub async fn build<V: TokenValidator>(
        self,
        validator: V,
    ) -> Result<TavernServer<V>, TavernError> {
        let transport =
            WebSocketTransport::bind(&self.config.bind, self.config.upgrade_policy()).await?;
        let hub = spawn_hub(self.config.hub.clone());

        let state = Arc::new(ServerState {
            hub,
            validator,
            codec: JsonCodec,
            session: self.config.session.validated(),
        });

        Ok(TavernServer { transport, state })
    }
}

impl Default for TavernServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Tavern server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct TavernServer<V> {
    transport: WebSocketTransport,
    state: Arc<ServerState<V>>,
}

impl TavernServer<()> {
    /// Creates a new builder.
    pub fn builder() -> TavernServerBuilder {
        TavernServerBuilder::new()
    }
}

impl<V: TokenValidator> TavernServer<V> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TavernError> {
        Ok(self.transport.local_addr()?)
    }

    /// A handle to the hub, for emitting server-side events or shutting it
    /// down from elsewhere.
    pub fn hub(&self) -> HubHandle {
        self.state.hub.clone()
    }

    /// Runs the accept loop until the hub stops.
    pub async fn run(self) -> Result<(), TavernError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the accept loop until `signal` resolves, then shuts the hub
    /// down.
    ///
    /// Also stops if the hub is shut down through [`hub()`](Self::hub).
    /// Either way, connection tasks get up to the session write deadline
    /// to send their close frames before this returns; any still running
    /// after that are aborted.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), TavernError>
    where
        F: Future,
    {
        let hub = self.state.hub.clone();
        tracing::info!(addr = %self.local_addr()?, "Tavern server running");
        tokio::pin!(signal);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(pending, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(finished) = connections.join_next() => {
                    if let Err(e) = finished {
                        tracing::error!(error = %e, "connection task failed");
                    }
                }
                () = hub.stopped() => {
                    tracing::info!("hub stopped, no longer accepting");
                    break;
                }
                _ = &mut signal => {
                    tracing::info!("shutdown requested");
                    hub.shutdown().await?;
                    break;
                }
            }
        }

        self.drain(connections).await;
        Ok(())
    }

    async fn drain(&self, mut connections: JoinSet<()>) {
        if connections.is_empty() {
            return;
        }
        tracing::info!(open = connections.len(), "waiting for connections to close");

        let deadline = self.state.session.write_deadline;
        let closed = time::timeout(deadline, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if closed.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                ?deadline,
                "connections still open, aborting"
            );
            connections.shutdown().await;
        }
    }
}
