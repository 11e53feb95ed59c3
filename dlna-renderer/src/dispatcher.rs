//! Sends control actions to the resolved service endpoints.

use std::sync::Arc;

use parking_lot::RwLock;
use soap_client::{SoapAction, SoapClient};
use tracing::debug;

use crate::endpoint::ServiceEndpoints;
use crate::error::{CommandError, Result};
use crate::service::Service;

/// Routes each action to the control URL of the service its envelope
/// addresses and runs the blocking HTTP exchange off the async workers.
///
/// No retries happen here.
#[derive(Clone)]
pub struct CommandDispatcher {
    client: SoapClient,
    endpoints: Arc<RwLock<ServiceEndpoints>>,
}

impl CommandDispatcher {
    pub fn new(client: SoapClient, endpoints: Arc<RwLock<ServiceEndpoints>>) -> Self {
        Self { client, endpoints }
    }

    /// Send `action` and return the 200 response body verbatim.
    ///
    /// Fails with [`CommandError::EndpointUnavailable`] without touching the
    /// network when the envelope addresses neither known service or that
    /// service's control URL is unresolved.
    pub async fn send(&self, action: SoapAction) -> Result<String> {
        let control_url = self.control_url_for(&action)?;
        debug!(action = %action.action_name, url = %control_url, "Dispatching action");

        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.call(&control_url, &action))
            .await
            .map_err(|e| CommandError::TransportError(format!("Request task failed: {e}")))?
            .map_err(CommandError::from)
    }

    fn control_url_for(&self, action: &SoapAction) -> Result<String> {
        let service = Service::referenced_by(&action.envelope()).ok_or_else(|| {
            CommandError::EndpointUnavailable(format!(
                "{} does not address a known service",
                action.action_name
            ))
        })?;

        self.endpoints
            .read()
            .control_url(service)
            .map(str::to_string)
            .ok_or_else(|| {
                CommandError::EndpointUnavailable(format!("{service} control URL is not resolved"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{ServiceDescription, ServiceEntry};
    use soap_client::{HttpResponse, MockTransport, SoapError};
    use std::net::{IpAddr, Ipv4Addr};

    fn dispatcher(mock: &Arc<MockTransport>, endpoints: ServiceEndpoints) -> CommandDispatcher {
        CommandDispatcher::new(
            SoapClient::with_transport(mock.clone()),
            Arc::new(RwLock::new(endpoints)),
        )
    }

    fn transport_only() -> ServiceEndpoints {
        let desc = ServiceDescription::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 1400).with_service(
            ServiceEntry::new(Service::AVTransport.urn(), "http://10.0.0.5:1400", "/avt/ctl", None),
        );
        ServiceEndpoints::resolve(&desc)
    }

    #[tokio::test]
    async fn test_unresolved_endpoint_makes_no_call() {
        let mock = Arc::new(MockTransport::new());
        let dispatcher = dispatcher(&mock, ServiceEndpoints::default());

        let err = dispatcher
            .send(SoapAction::new(Service::AVTransport.urn(), "Play").param("Speed", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EndpointUnavailable(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_routes_by_envelope_urn() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("Play", Ok(HttpResponse::new(200).with_body("<PlayResponse/>")));
        let dispatcher = dispatcher(&mock, transport_only());

        let body = dispatcher
            .send(SoapAction::new(Service::AVTransport.urn(), "Play"))
            .await
            .unwrap();
        assert_eq!(body, "<PlayResponse/>");
        assert_eq!(mock.requests()[0].url, "http://10.0.0.5:1400/avt/ctl");

        // Rendering control is not resolved in this description
        let err = dispatcher
            .send(SoapAction::new(Service::RenderingControl.urn(), "GetVolume"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EndpointUnavailable(_)));

        let err = dispatcher
            .send(SoapAction::new("urn:schemas-upnp-org:service:ConnectionManager:1", "GetProtocolInfo"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EndpointUnavailable(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_maps_failures() {
        let mock = Arc::new(MockTransport::new());
        mock.enqueue("Stop", Ok(HttpResponse::new(500)));
        mock.enqueue("Stop", Err(SoapError::Network("connection refused".into())));
        let dispatcher = dispatcher(&mock, transport_only());
        let stop = || SoapAction::new(Service::AVTransport.urn(), "Stop");

        assert_eq!(
            dispatcher.send(stop()).await.unwrap_err(),
            CommandError::DeviceError {
                code: 500,
                upnp_error: None
            }
        );
        assert!(matches!(
            dispatcher.send(stop()).await.unwrap_err(),
            CommandError::TransportError(_)
        ));
    }

    #[tokio::test]
    async fn test_endpoint_replacement_is_observed() {
        let mock = Arc::new(MockTransport::new());
        let endpoints = Arc::new(RwLock::new(ServiceEndpoints::default()));
        let dispatcher = CommandDispatcher::new(SoapClient::with_transport(mock.clone()), endpoints.clone());

        assert!(dispatcher
            .send(SoapAction::new(Service::AVTransport.urn(), "Pause"))
            .await
            .is_err());

        *endpoints.write() = transport_only();
        assert!(dispatcher
            .send(SoapAction::new(Service::AVTransport.urn(), "Pause"))
            .await
            .is_ok());
    }
}
