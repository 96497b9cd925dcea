//! Client-side connection management for Tavern.
//!
//! [`ConnectionManager`] keeps one authenticated socket to a Tavern server
//! alive: it answers the server's `auth_required` with a token from a
//! [`CredentialsProvider`], routes incoming envelopes to callbacks by
//! `type`, and reconnects with capped exponential [`Backoff`] when the
//! socket drops.
//!
//! ```text
//! Idle → Connecting → AwaitingAuth → Joined
//!                         ↑             │ unexpected close
//!                         └─ Reconnecting{attempt, delay} ←┘
//!                                 │ attempts exhausted
//!                                 ▼
//!                           Disconnected
//! ```

mod backoff;
mod config;
mod credentials;
mod error;
mod manager;
mod state;
mod subscribers;

pub use backoff::Backoff;
pub use config::ClientConfig;
pub use credentials::{CredentialsProvider, StaticCredentials};
pub use error::ClientError;
pub use manager::ConnectionManager;
pub use state::ConnectionState;
pub use subscribers::SubscriptionId;
