//! The connection hub: the single owner of who is connected and which room
//! they sit in.
//!
//! The hub runs as one Tokio task (actor model). Sessions, the server and
//! outside collaborators such as a dice engine reach it only through a
//! [`HubHandle`], which puts commands on a bounded queue. Nothing else ever
//! touches the client set or the room map, so there is no lock to take.
//!
//! # Key types
//!
//! - [`spawn_hub`] — starts the hub task
//! - [`HubHandle`] — cheap-to-clone handle; also the sessions' [`HubLink`](tavern_session::HubLink)
//! - [`HubStats`] — a membership snapshot
//! - [`HubConfig`] — command queue sizing

mod config;
mod error;
mod handle;
mod hub;

pub use config::HubConfig;
pub use error::HubError;
pub use handle::HubHandle;
pub use hub::{spawn_hub, HubStats, RoomInfo};
