//! Error types for the mesh coordinator.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating peer links.
#[derive(Error, Debug)]
pub enum Error {
    /// Establishing a session with a peer failed.
    #[error("failed to connect to peer {address}: {reason}")]
    Connect {
        /// Address of the unreachable peer.
        address: String,
        /// Underlying cause, as reported by the link layer.
        reason: String,
    },

    /// Opening a subscription on an established session failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Publishing an event to a peer failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The operation was cancelled by manager shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// The manager has already been closed.
    #[error("manager is closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
