//! SOAP and GENA client for UPnP media renderers
//!
//! This crate holds the wire-level pieces of a DLNA control point: request
//! envelopes, DIDL-Lite metadata, flat field extraction from responses, and
//! a blocking client for control (`POST`) and eventing
//! (`SUBSCRIBE`/`UNSUBSCRIBE`) requests. It has no notion of which device or
//! service it is talking to; that lives in the consuming crate.

pub mod didl;
pub mod envelope;
mod error;
pub mod fields;
pub mod transport;

pub use didl::{build_didl_lite_metadata, parse_didl_item, DidlItem, ItemClass};
pub use envelope::{build_envelope, SoapAction};
pub use error::SoapError;
pub use fields::{extract_field, format_seek_target, parse_duration, FieldExtractor, FirstMatchExtractor};
#[cfg(any(test, feature = "test-support"))]
pub use transport::MockTransport;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, UreqTransport};

use std::sync::Arc;

use tracing::debug;
use xmltree::Element;

/// Response from a UPnP subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Timeout granted by the device, or the requested one if it sent none
    pub timeout_seconds: u32,
}

/// A minimal SOAP client for UPnP device communication
///
/// Every method blocks the calling thread for one HTTP round trip; async
/// callers run it on a blocking pool.
#[derive(Clone)]
pub struct SoapClient {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
}

impl SoapClient {
    /// Create a new SOAP client with default timeouts
    pub fn new() -> Self {
        Self::with_transport(Arc::new(UreqTransport::default()))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            user_agent: format!(
                "{}/{} UPnP/1.1",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }

    /// Override the `USER-AGENT` header sent with GENA requests.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// POST `action` to `control_url` and return the response body verbatim.
    ///
    /// Any status other than 200 becomes [`SoapError::Http`], carrying the
    /// UPnP `errorCode` when the body is a SOAP fault.
    pub fn call(&self, control_url: &str, action: &SoapAction) -> Result<String, SoapError> {
        let request = HttpRequest::new("POST", control_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action.soap_action_header())
            .body(action.envelope());

        debug!(url = control_url, action = %action.action_name, "Sending SOAP request");
        let response = self.transport.execute(&request)?;

        if response.status != 200 {
            return Err(SoapError::Http {
                status: response.status,
                upnp_error: fault_error_code(&response.body),
            });
        }
        Ok(response.body)
    }

    /// Subscribe to events at `event_url`, asking the device to deliver
    /// NOTIFY requests to `callback_url`.
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        let request = self
            .gena_request("SUBSCRIBE", event_url)
            .header("CALLBACK", format!("<{callback_url}>"))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{timeout_seconds}"));

        let response = self.transport.execute(&request)?;
        if response.status != 200 {
            return Err(SoapError::status(response.status));
        }

        let sid = response
            .header("SID")
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
            .to_string();

        Ok(SubscriptionResponse {
            sid,
            timeout_seconds: granted_timeout(&response).unwrap_or(timeout_seconds),
        })
    }

    /// Renew an existing subscription. Returns the granted timeout.
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<u32, SoapError> {
        let request = self
            .gena_request("SUBSCRIBE", event_url)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{timeout_seconds}"));

        let response = self.transport.execute(&request)?;
        if response.status != 200 {
            return Err(SoapError::status(response.status));
        }
        Ok(granted_timeout(&response).unwrap_or(timeout_seconds))
    }

    /// Cancel a subscription.
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        let request = self.gena_request("UNSUBSCRIBE", event_url).header("SID", sid);

        let response = self.transport.execute(&request)?;
        if response.status != 200 {
            return Err(SoapError::status(response.status));
        }
        Ok(())
    }

    fn gena_request(&self, method: &str, event_url: &str) -> HttpRequest {
        debug!(method, url = event_url, "Sending GENA request");
        HttpRequest::new(method, event_url)
            .header("USER-AGENT", self.user_agent.as_str())
            .header("Connection", "close")
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapClient")
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Parse "Second-1800"; "infinite" and garbage yield `None`.
fn granted_timeout(response: &HttpResponse) -> Option<u32> {
    response
        .header("TIMEOUT")?
        .trim()
        .strip_prefix("Second-")?
        .parse()
        .ok()
}

/// `errorCode` from a SOAP fault body, if the body is one.
fn fault_error_code(body: &str) -> Option<u16> {
    let xml = Element::parse(body.as_bytes()).ok()?;
    let detail = xml.get_child("Body")?.get_child("Fault")?.get_child("detail")?;
    // Some stacks spell it UpnPError
    let error = detail
        .get_child("UPnPError")
        .or_else(|| detail.get_child("UpnPError"))?;
    let code = error.get_child("errorCode")?.get_text()?.trim().parse().ok();
    code
}
