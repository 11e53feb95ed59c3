//! Error types for the callback server

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound
    #[error("Failed to bind callback server to {addr}: {message}")]
    Bind { addr: String, message: String },

    /// No local address routes toward the device
    #[error("Failed to detect a local IP address reachable from {0}")]
    LocalIpUnavailable(String),
}
