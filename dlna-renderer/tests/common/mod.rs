#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use dlna_renderer::{MediaRenderer, RendererConfig, Service, ServiceDescription, ServiceEntry};
use soap_client::{HttpResponse, MockTransport};

pub const DEVICE: &str = "http://127.0.0.1:1400";

/// A renderer advertising both services, with eventing.
pub fn description() -> ServiceDescription {
    ServiceDescription::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1400)
        .with_service(ServiceEntry::new(
            "urn:schemas-upnp-org:service:ConnectionManager:1",
            DEVICE,
            "/ConnectionManager/Control",
            Some("/ConnectionManager/Event".to_string()),
        ))
        .with_service(ServiceEntry::new(
            Service::AVTransport.urn(),
            DEVICE,
            "/AVTransport/Control",
            Some("/AVTransport/Event".to_string()),
        ))
        .with_service(ServiceEntry::new(
            Service::RenderingControl.urn(),
            DEVICE,
            "/RenderingControl/Control",
            Some("/RenderingControl/Event".to_string()),
        ))
}

/// Callback server on loopback, advertised as loopback.
pub fn local_config() -> RendererConfig {
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    RendererConfig::default()
        .with_callback_bind(localhost, 0)
        .with_callback_host(localhost)
}

pub fn renderer(mock: &Arc<MockTransport>, config: RendererConfig) -> MediaRenderer {
    MediaRenderer::builder(description())
        .config(config)
        .transport(mock.clone())
        .build()
        .expect("renderer should build")
}

pub fn soap_response(action: &str, fields: &[(&str, &str)]) -> HttpResponse {
    let fields: String = fields
        .iter()
        .map(|(name, value)| format!("<{name}>{value}</{name}>"))
        .collect();
    HttpResponse::new(200).with_body(format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action}Response xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">{fields}</u:{action}Response></s:Body></s:Envelope>"#
    ))
}

pub fn position_info(duration: &str, rel_time: &str, track_metadata: &str) -> HttpResponse {
    soap_response(
        "GetPositionInfo",
        &[
            ("Track", "1"),
            ("TrackDuration", duration),
            ("TrackMetaData", track_metadata),
            ("TrackURI", "http://127.0.0.1:8000/media"),
            ("RelTime", rel_time),
            ("AbsTime", "NOT_IMPLEMENTED"),
        ],
    )
}

/// Escaped DIDL-Lite for one item, as found in `TrackMetaData`.
pub fn track_metadata(mime_type: &str, class: &str) -> String {
    let didl = format!(
        r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/"><item id="1000" parentID="0" restricted="0"><dc:title>Fixture</dc:title><res protocolInfo="http-get:*:{mime_type}:DLNA.ORG_OP=01">http://127.0.0.1:8000/media</res><upnp:class>{class}</upnp:class></item></DIDL-Lite>"#
    );
    quick_xml::escape::escape(didl.as_str()).into_owned()
}

/// A GENA NOTIFY body carrying `last_change` (unescaped).
pub fn notify_body(last_change: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>{}</LastChange></e:property></e:propertyset>"#,
        quick_xml::escape::escape(last_change)
    )
}

pub fn subscribe_ok(sid: &str) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("SID", sid)
        .with_header("TIMEOUT", "Second-300")
}
