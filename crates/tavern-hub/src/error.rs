//! Error types for the hub.

/// Errors returned by [`HubHandle`](crate::HubHandle) operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub task has exited (after shutdown, or every handle dropped).
    #[error("hub is not running")]
    Unavailable,
}
