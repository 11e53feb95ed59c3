//! Error types for the SOAP client

use thiserror::Error;

/// Errors that can occur during SOAP and GENA communication
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoapError {
    /// DNS, connect, timeout or I/O failure before a status line was read
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// Expected field absent or malformed in a response
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// The device answered with a non-200 status
    #[error("HTTP status {status}{}", fault_suffix(.upnp_error))]
    Http {
        status: u16,
        /// `errorCode` from a SOAP fault body, when one was present
        upnp_error: Option<u16>,
    },
}

fn fault_suffix(upnp_error: &Option<u16>) -> String {
    match upnp_error {
        Some(code) => format!(" (UPnP error {code})"),
        None => String::new(),
    }
}

impl SoapError {
    /// Status-only error with no fault detail.
    pub fn status(status: u16) -> Self {
        SoapError::Http {
            status,
            upnp_error: None,
        }
    }
}
