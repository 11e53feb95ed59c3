//! Decoding of GENA notifications into typed renderer events.
//!
//! AVTransport and RenderingControl both report state through a single
//! `LastChange` property whose value is an escaped XML document:
//!
//! ```text
//! <Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/">
//!   <InstanceID val="0">
//!     <TransportState val="PLAYING"/>
//!     <CurrentTrackMetaData val="&lt;DIDL-Lite ...&gt;"/>
//!   </InstanceID>
//! </Event>
//! ```

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use soap_client::{extract_field, parse_didl_item, SoapError};
use tracing::debug;

use crate::model::{parse_upnp_bool, percent_to_volume, MediaInfo, PlayState};
use crate::service::Service;

/// The logical event a listener registers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventTarget {
    PlayState,
    MediaInfo,
    Volume,
    Mute,
}

impl EventTarget {
    /// The service whose event channel carries this target.
    pub fn service(&self) -> Service {
        match self {
            EventTarget::PlayState | EventTarget::MediaInfo => Service::AVTransport,
            EventTarget::Volume | EventTarget::Mute => Service::RenderingControl,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventTarget::PlayState => "playState",
            EventTarget::MediaInfo => "mediaInfo",
            EventTarget::Volume => "volume",
            EventTarget::Mute => "mute",
        }
    }
}

/// A state change pushed by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererEvent {
    PlayState(PlayState),
    MediaInfo(MediaInfo),
    /// In [0, 1]
    Volume(f32),
    Mute(bool),
}

impl RendererEvent {
    pub fn target(&self) -> EventTarget {
        match self {
            RendererEvent::PlayState(_) => EventTarget::PlayState,
            RendererEvent::MediaInfo(_) => EventTarget::MediaInfo,
            RendererEvent::Volume(_) => EventTarget::Volume,
            RendererEvent::Mute(_) => EventTarget::Mute,
        }
    }
}

/// One `<Name val="..." channel="..."/>` entry of a LastChange document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub channel: Option<String>,
    pub value: String,
}

/// Parse the (unescaped) LastChange document into its state variables.
pub fn parse_last_change(xml: &str) -> Result<Vec<StateVariable>, SoapError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut variables = Vec::new();
    let mut in_instance = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                match element.local_name().as_ref() {
                    b"Event" => {}
                    b"InstanceID" => in_instance = true,
                    name if in_instance => {
                        if let Some(value) = attribute(&element, b"val")? {
                            variables.push(StateVariable {
                                name: String::from_utf8_lossy(name).into_owned(),
                                channel: attribute(&element, b"channel")?,
                                value,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(element)) => {
                if element.local_name().as_ref() == b"InstanceID" {
                    in_instance = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SoapError::Parse(format!("Invalid LastChange: {e}"))),
            _ => {}
        }
    }

    Ok(variables)
}

/// Typed events carried by a NOTIFY body. Bodies without a decodable
/// `LastChange` yield nothing.
pub fn decode_notification(body: &str) -> Vec<RendererEvent> {
    let escaped = match extract_field(body, "LastChange") {
        Ok(value) => value,
        Err(_) => {
            debug!("Notification has no LastChange property");
            return Vec::new();
        }
    };
    let last_change = match unescape(escaped) {
        Ok(xml) => xml,
        Err(e) => {
            debug!(error = %e, "LastChange is not valid escaped XML");
            return Vec::new();
        }
    };
    let variables = match parse_last_change(&last_change) {
        Ok(variables) => variables,
        Err(e) => {
            debug!(error = %e, "Failed to parse LastChange");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let mut media_seen = false;
    for variable in variables {
        let master = variable
            .channel
            .as_deref()
            .map_or(true, |channel| channel == "Master");

        match variable.name.as_str() {
            "TransportState" => {
                events.push(RendererEvent::PlayState(PlayState::from_transport_state(&variable.value)))
            }
            "CurrentTrackMetaData" | "AVTransportURIMetaData" if !media_seen => {
                if let Ok(item) = parse_didl_item(&variable.value) {
                    media_seen = true;
                    events.push(RendererEvent::MediaInfo(item.into()));
                }
            }
            "Volume" if master => match variable.value.trim().parse::<i64>() {
                Ok(percent) => events.push(RendererEvent::Volume(percent_to_volume(percent))),
                Err(_) => debug!(value = %variable.value, "Ignoring non-numeric Volume"),
            },
            "Mute" if master => match parse_upnp_bool(&variable.value) {
                Some(muted) => events.push(RendererEvent::Mute(muted)),
                None => debug!(value = %variable.value, "Ignoring unrecognized Mute"),
            },
            _ => {}
        }
    }
    events
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, SoapError> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| SoapError::Parse(e.to_string()))?;
    attr.map(|a| {
        a.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|e| SoapError::Parse(e.to_string()))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::escape::escape;

    fn propertyset(last_change: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>{}</LastChange></e:property></e:propertyset>"#,
            escape(last_change)
        )
    }

    #[test]
    fn test_targets_map_to_services() {
        assert_eq!(EventTarget::PlayState.service(), Service::AVTransport);
        assert_eq!(EventTarget::MediaInfo.service(), Service::AVTransport);
        assert_eq!(EventTarget::Volume.service(), Service::RenderingControl);
        assert_eq!(EventTarget::Mute.service(), Service::RenderingControl);
        assert_eq!(EventTarget::PlayState.name(), "playState");
    }

    #[test]
    fn test_parse_last_change() {
        let xml = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"><InstanceID val="0"><Volume channel="Master" val="42"/><Volume channel="LF" val="40"/><Mute channel="Master" val="0"/></InstanceID></Event>"#;
        let variables = parse_last_change(xml).unwrap();
        assert_eq!(variables.len(), 3);
        assert_eq!(variables[0].name, "Volume");
        assert_eq!(variables[0].channel.as_deref(), Some("Master"));
        assert_eq!(variables[0].value, "42");
        assert_eq!(variables[2].name, "Mute");
    }

    #[test]
    fn test_decode_rendering_control_event() {
        let body = propertyset(
            r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"><InstanceID val="0"><Volume channel="Master" val="42"/><Volume channel="LF" val="10"/><Mute channel="Master" val="1"/></InstanceID></Event>"#,
        );
        assert_eq!(
            decode_notification(&body),
            vec![RendererEvent::Volume(0.42), RendererEvent::Mute(true)]
        );
    }

    #[test]
    fn test_decode_transport_event_with_metadata() {
        let didl = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/"><item id="1" parentID="0" restricted="1"><dc:title>Song</dc:title><res protocolInfo="http-get:*:audio/mpeg:*">http://h/s.mp3</res><upnp:class>object.item.audioItem</upnp:class></item></DIDL-Lite>"#;
        let last_change = format!(
            r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"><InstanceID val="0"><TransportState val="PLAYING"/><CurrentTrackMetaData val="{}"/><AVTransportURIMetaData val="{}"/></InstanceID></Event>"#,
            escape(didl),
            escape(didl)
        );
        let events = decode_notification(&propertyset(&last_change));

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RendererEvent::PlayState(PlayState::Playing));
        match &events[1] {
            RendererEvent::MediaInfo(info) => {
                assert_eq!(info.title.as_deref(), Some("Song"));
                assert_eq!(info.mime_type.as_deref(), Some("audio/mpeg"));
                assert_eq!(info.url.as_deref(), Some("http://h/s.mp3"));
            }
            other => panic!("Expected MediaInfo, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_metadata_is_skipped() {
        let body = propertyset(
            r#"<Event><InstanceID val="0"><CurrentTrackMetaData val="NOT_IMPLEMENTED"/><TransportState val="STOPPED"/></InstanceID></Event>"#,
        );
        assert_eq!(
            decode_notification(&body),
            vec![RendererEvent::PlayState(PlayState::Finished)]
        );
    }

    #[test]
    fn test_notification_without_last_change() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><SourceProtocolInfo>http-get:*:*:*</SourceProtocolInfo></e:property></e:propertyset>"#;
        assert!(decode_notification(body).is_empty());
    }

    #[test]
    fn test_malformed_last_change_yields_nothing() {
        let body = propertyset("<Event><InstanceID val=\"0\"><Volume val=\"5\"></Event>");
        assert!(decode_notification(&body).is_empty());
    }
}
