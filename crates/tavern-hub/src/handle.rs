//! The hub's public handle.

use serde_json::Value;
use tavern_protocol::{ClientId, Envelope, MessageKind, RoomId};
use tavern_session::{ClientSession, HubLink, SessionError};
use tokio::sync::{mpsc, oneshot};

use crate::hub::HubCommand;
use crate::{HubError, HubStats};

/// Handle to the running hub. Used to send commands to it.
///
/// Cheap to clone: it's an `mpsc::Sender` wrapper. Every session task holds
/// one, as does the server.
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub(crate) fn new(sender: mpsc::Sender<HubCommand>) -> Self {
        Self { sender }
    }

    /// Hands an authenticated session to the hub. Returns once the session
    /// is in the client set (and in its room, if it has one).
    pub async fn register(&self, session: ClientSession) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(HubCommand::Register { session, ack }).await?;
        done.await.map_err(|_| HubError::Unavailable)
    }

    /// Routes a server-originated envelope to the room named in its
    /// `roomId`. Envelopes without a room, or for an empty room, are
    /// dropped.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubCommand::Dispatch { envelope }).await
    }

    /// Emits a server-originated event into `room`, for collaborators such
    /// as a dice or combat engine.
    pub async fn broadcast(
        &self,
        room: impl Into<RoomId>,
        kind: impl Into<MessageKind>,
        data: Value,
    ) -> Result<(), HubError> {
        self.dispatch(Envelope::new(kind, data).in_room(room)).await
    }

    /// Takes a membership snapshot.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Unavailable)
    }

    /// Closes every session and stops the hub.
    ///
    /// Returns once the hub has closed every outbound queue. Calling it
    /// again, or after the hub has stopped, is a no-op.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (done, finished) = oneshot::channel();
        if self.sender.send(HubCommand::Shutdown { done }).await.is_err() {
            return Ok(());
        }
        // A dropped `done` means another shutdown got there first.
        let _ = finished.await;
        Ok(())
    }

    /// Returns `true` while the hub task is running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Waits until the hub task has exited.
    pub async fn stopped(&self) {
        self.sender.closed().await;
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.sender.send(cmd).await.map_err(|_| HubError::Unavailable)
    }
}

impl HubLink for HubHandle {
    async fn publish(&self, sender: &ClientId, envelope: Envelope) -> Result<(), SessionError> {
        self.send(HubCommand::Publish {
            sender: sender.clone(),
            envelope,
        })
        .await
        .map_err(|_| SessionError::HubUnavailable)
    }

    async fn join_room(&self, client: &ClientId, room: RoomId) -> Result<(), SessionError> {
        self.send(HubCommand::Join {
            client: client.clone(),
            room,
        })
        .await
        .map_err(|_| SessionError::HubUnavailable)
    }

    async fn leave_room(&self, client: &ClientId) -> Result<(), SessionError> {
        self.send(HubCommand::Leave {
            client: client.clone(),
        })
        .await
        .map_err(|_| SessionError::HubUnavailable)
    }

    async fn unregister(&self, client: &ClientId) {
        let cmd = HubCommand::Unregister {
            client: client.clone(),
        };
        if self.send(cmd).await.is_err() {
            tracing::trace!(client_id = %client, "hub gone, nothing to unregister");
        }
    }
}
