//! Error types for renderer control

use callback_server::ServerError;
use soap_client::SoapError;
use thiserror::Error;

/// Outcome of a failed control operation.
///
/// Every command delivers exactly one of these to its caller on failure.
/// Subscription bookkeeping never produces one; see
/// [`SubscriptionManager`](crate::SubscriptionManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Caller-supplied input failed a precondition; nothing was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The control URL the command needs was not resolved
    #[error("Endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// DNS, connect, timeout or I/O failure
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Non-200 HTTP status from the device
    #[error("Device error: HTTP {code}")]
    DeviceError {
        code: u16,
        /// UPnP `errorCode` from the SOAP fault, if any
        upnp_error: Option<u16>,
    },

    /// Expected field absent or malformed in a response
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No protocol action exists for the operation
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl From<SoapError> for CommandError {
    fn from(error: SoapError) -> Self {
        match error {
            SoapError::Network(msg) => CommandError::TransportError(msg),
            SoapError::Parse(msg) => CommandError::ParseError(msg),
            SoapError::Http { status, upnp_error } => CommandError::DeviceError {
                code: status,
                upnp_error,
            },
        }
    }
}

/// Errors building a [`MediaRenderer`](crate::MediaRenderer).
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to start worker runtime: {0}")]
    Runtime(String),

    #[error("Invalid device description: {0}")]
    Description(String),

    #[error("Callback server error: {0}")]
    CallbackServer(#[from] ServerError),
}

pub type Result<T> = std::result::Result<T, CommandError>;
