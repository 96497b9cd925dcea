//! Wire protocol for Tavern.
//!
//! This crate defines the "language" that table clients and the hub speak:
//!
//! - **Identity types** ([`RoomId`], [`ClientId`], [`UserId`]).
//! - **Control frames** ([`ControlFrame`]) — the authentication handshake
//!   (`auth_required` → `auth` → `auth_success` | `error`).
//! - **Envelopes** ([`Envelope`], [`MessageKind`]) — everything else that
//!   travels through a room. Only `type` and `roomId` are interpreted by the
//!   hub; `data` is an opaque JSON value owned by whoever emitted it.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages become
//!   UTF-8 text frames and back.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw text frames) and session
//! (authenticated identity). It doesn't know about sockets or rooms.
//!
//! ```text
//! Transport (text) → Protocol (Envelope / ControlFrame) → Session → Hub
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ClientId, ControlFrame, Envelope, MessageKind, RoomId, UserId,
    INVALID_AUTH_MESSAGE, INVALID_TOKEN,
};
