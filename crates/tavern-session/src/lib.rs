//! Per-connection session management for Tavern.
//!
//! This crate handles everything that happens on one socket:
//!
//! 1. **Authentication** — the [`TokenValidator`] capability and the server
//!    side of the handshake ([`ServerHandshake`]).
//! 2. **Session identity** — [`ClientSession`], the record the hub tracks,
//!    with its bounded [`OutboundQueue`].
//! 3. **Session loops** — [`read_loop`] and [`write_loop`], which bridge the
//!    socket to the hub through the [`HubLink`] seam.
//!
//! # How it fits in the stack
//!
//! ```text
//! Hub (above)  ← owns registered sessions, fans frames out
//!     ↕  HubLink / OutboundQueue
//! Session Layer (this crate)  ← handshake, read loop, write loop
//!     ↕
//! Transport + Protocol (below)  ← text frames, envelopes
//! ```

mod auth;
mod error;
mod handshake;
mod pump;
mod session;

#[cfg(test)]
mod testing;

pub use auth::{Role, StaticTokens, Subject, TokenValidator};
pub use error::{AuthError, SessionError};
pub use handshake::{Authenticated, HandshakeState, ServerHandshake};
pub use pump::{drive, read_loop, write_loop, HubLink};
pub use session::{
    ClientSession, EnqueueError, OutboundFrame, OutboundQueue,
    OutboundReceiver, SessionConfig,
};
