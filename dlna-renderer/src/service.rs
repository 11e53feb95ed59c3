//! The UPnP services a renderer is driven through.

use std::fmt;

/// A UPnP service role this crate controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    /// Transport control: play, pause, seek, position, media URI
    AVTransport,
    /// Volume and mute
    RenderingControl,
}

const GROUP_RENDERING_CONTROL: &str = "GroupRenderingControl";

impl Service {
    pub const ALL: [Service; 2] = [Service::AVTransport, Service::RenderingControl];

    pub fn name(&self) -> &'static str {
        match self {
            Service::AVTransport => "AVTransport",
            Service::RenderingControl => "RenderingControl",
        }
    }

    pub fn urn(&self) -> &'static str {
        match self {
            Service::AVTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            Service::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
        }
    }

    /// Whether an advertised `serviceType` string is this service.
    ///
    /// The group variant of rendering control is a different service and
    /// never matches.
    pub fn matches_service_type(&self, service_type: &str) -> bool {
        match self {
            Service::AVTransport => service_type.contains(self.name()),
            Service::RenderingControl => {
                service_type.contains(self.name()) && !service_type.contains(GROUP_RENDERING_CONTROL)
            }
        }
    }

    /// The service whose URN an envelope is namespaced with.
    pub fn referenced_by(envelope: &str) -> Option<Service> {
        Service::ALL
            .into_iter()
            .find(|service| envelope.contains(service.urn()))
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
