//! Observable connection state.

use std::time::Duration;

use tavern_protocol::{ClientId, UserId};

/// Where the connection manager currently is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Idle,
    /// Opening the socket.
    Connecting,
    /// Socket open, waiting for the server's `auth_required`/`auth_success`.
    AwaitingAuth,
    /// Authenticated; frames flow both ways.
    Joined { client_id: ClientId, user_id: UserId },
    /// Closing on request.
    Closing,
    /// Waiting `delay` before reconnect attempt `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Gave up after the configured number of attempts. Only an explicit
    /// `connect` leaves this state.
    Disconnected,
}

impl ConnectionState {
    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joined { .. })
    }
}
