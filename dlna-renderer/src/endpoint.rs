//! Service endpoint resolution and the capability set derived from it.

use std::collections::BTreeSet;
use std::net::IpAddr;

use url::Url;

use crate::description::{ServiceDescription, ServiceEntry};
use crate::service::Service;

/// A resolved service: where to POST actions and where to subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_type: String,
    /// Absolute control URL
    pub control_url: String,
    /// Event subscription path, always starting with `/`
    pub event_sub_url: Option<String>,
    /// Absolute event subscription URL
    pub event_url: Option<String>,
}

impl ServiceEndpoint {
    fn from_entry(entry: &ServiceEntry) -> Self {
        let event_url = entry
            .event_sub_url
            .as_deref()
            .map(|path| join_url(&entry.base_url, path));
        let event_sub_url = event_url.as_deref().map(url_path);

        Self {
            service_type: entry.service_type.clone(),
            control_url: join_url(&entry.base_url, &entry.control_url),
            event_sub_url,
            event_url,
        }
    }
}

/// The two control URLs this crate drives, resolved from a description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEndpoints {
    device_ip: Option<IpAddr>,
    av_transport: Option<ServiceEndpoint>,
    rendering_control: Option<ServiceEndpoint>,
}

impl ServiceEndpoints {
    /// Pick the first matching entry for each service, in advertised order.
    pub fn resolve(description: &ServiceDescription) -> Self {
        let find = |service: Service| {
            description
                .services
                .iter()
                .find(|entry| service.matches_service_type(&entry.service_type))
                .map(ServiceEndpoint::from_entry)
        };

        Self {
            device_ip: Some(description.ip_address),
            av_transport: find(Service::AVTransport),
            rendering_control: find(Service::RenderingControl),
        }
    }

    /// Address of the device the endpoints were resolved from.
    pub fn device_ip(&self) -> Option<IpAddr> {
        self.device_ip
    }

    pub fn get(&self, service: Service) -> Option<&ServiceEndpoint> {
        match service {
            Service::AVTransport => self.av_transport.as_ref(),
            Service::RenderingControl => self.rendering_control.as_ref(),
        }
    }

    pub fn control_url(&self, service: Service) -> Option<&str> {
        self.get(service).map(|e| e.control_url.as_str())
    }

    pub fn capabilities(&self) -> BTreeSet<Capability> {
        let mut capabilities = BTreeSet::new();
        if self.av_transport.is_some() {
            capabilities.extend(Capability::TRANSPORT);
        }
        if self.rendering_control.is_some() {
            capabilities.extend(Capability::RENDERING);
        }
        capabilities
    }
}

/// An operation a resolved renderer supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Play,
    Pause,
    Stop,
    Seek,
    Next,
    Previous,
    Position,
    Duration,
    PlayState,
    PlayStateSubscribe,
    MediaInfo,
    MediaInfoSubscribe,
    DisplayImage,
    PlayVideo,
    PlayAudio,
    Close,
    VolumeGet,
    VolumeSet,
    VolumeUpDown,
    VolumeSubscribe,
    MuteGet,
    MuteSet,
    MuteSubscribe,
}

impl Capability {
    const TRANSPORT: [Capability; 16] = [
        Capability::Play,
        Capability::Pause,
        Capability::Stop,
        Capability::Seek,
        Capability::Next,
        Capability::Previous,
        Capability::Position,
        Capability::Duration,
        Capability::PlayState,
        Capability::PlayStateSubscribe,
        Capability::MediaInfo,
        Capability::MediaInfoSubscribe,
        Capability::DisplayImage,
        Capability::PlayVideo,
        Capability::PlayAudio,
        Capability::Close,
    ];

    const RENDERING: [Capability; 7] = [
        Capability::VolumeGet,
        Capability::VolumeSet,
        Capability::VolumeUpDown,
        Capability::VolumeSubscribe,
        Capability::MuteGet,
        Capability::MuteSet,
        Capability::MuteSubscribe,
    ];
}

/// `base` + `path`, unless `path` is already absolute.
fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Path (and query) of an absolute URL, `/` if it cannot be parsed.
fn url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const BASE: &str = "http://10.0.0.5:1400";

    fn entry(service_type: &str, control: &str, event: Option<&str>) -> ServiceEntry {
        ServiceEntry::new(service_type, BASE, control, event.map(str::to_string))
    }

    fn description(entries: Vec<ServiceEntry>) -> ServiceDescription {
        entries.into_iter().fold(
            ServiceDescription::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 1400),
            ServiceDescription::with_service,
        )
    }

    #[test]
    fn test_resolve_both_services() {
        let desc = description(vec![
            entry("urn:schemas-upnp-org:service:ConnectionManager:1", "/cm/ctl", Some("/cm/evt")),
            entry("urn:schemas-upnp-org:service:AVTransport:1", "/avt/ctl", Some("/avt/evt")),
            entry("urn:schemas-upnp-org:service:RenderingControl:1", "rc/ctl", Some("rc/evt")),
        ]);
        let endpoints = ServiceEndpoints::resolve(&desc);

        let avt = endpoints.get(Service::AVTransport).unwrap();
        assert_eq!(avt.control_url, "http://10.0.0.5:1400/avt/ctl");
        assert_eq!(avt.event_sub_url.as_deref(), Some("/avt/evt"));
        assert_eq!(avt.event_url.as_deref(), Some("http://10.0.0.5:1400/avt/evt"));

        let rc = endpoints.get(Service::RenderingControl).unwrap();
        assert_eq!(rc.control_url, "http://10.0.0.5:1400/rc/ctl");
        assert_eq!(rc.event_sub_url.as_deref(), Some("/rc/evt"));
        assert_eq!(endpoints.device_ip(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
        assert_eq!(ServiceEndpoints::default().device_ip(), None);
    }

    #[test]
    fn test_group_rendering_control_does_not_shadow() {
        let desc = description(vec![
            entry("urn:schemas-upnp-org:service:GroupRenderingControl:1", "/grc/ctl", None),
            entry("urn:schemas-upnp-org:service:RenderingControl:1", "/rc/ctl", None),
        ]);
        let endpoints = ServiceEndpoints::resolve(&desc);
        assert_eq!(
            endpoints.control_url(Service::RenderingControl),
            Some("http://10.0.0.5:1400/rc/ctl")
        );
    }

    #[test]
    fn test_first_match_wins() {
        let desc = description(vec![
            entry("urn:schemas-upnp-org:service:AVTransport:1", "/first", None),
            entry("urn:schemas-upnp-org:service:AVTransport:1", "/second", None),
        ]);
        assert_eq!(
            ServiceEndpoints::resolve(&desc).control_url(Service::AVTransport),
            Some("http://10.0.0.5:1400/first")
        );
    }

    #[test]
    fn test_only_group_rendering_control_leaves_rendering_unset() {
        let desc = description(vec![entry(
            "urn:schemas-upnp-org:service:GroupRenderingControl:1",
            "/grc/ctl",
            None,
        )]);
        let endpoints = ServiceEndpoints::resolve(&desc);
        assert!(endpoints.get(Service::RenderingControl).is_none());
        assert!(endpoints.capabilities().is_empty());
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let desc = description(vec![entry(
            "urn:schemas-upnp-org:service:AVTransport:1",
            "http://10.0.0.6:8000/ctl",
            Some("http://10.0.0.6:8000/evt?svc=avt"),
        )]);
        let avt = ServiceEndpoints::resolve(&desc);
        let avt = avt.get(Service::AVTransport).unwrap();
        assert_eq!(avt.control_url, "http://10.0.0.6:8000/ctl");
        assert_eq!(avt.event_sub_url.as_deref(), Some("/evt?svc=avt"));
    }

    #[test]
    fn test_capabilities_follow_endpoints() {
        let transport_only = description(vec![entry("urn:schemas-upnp-org:service:AVTransport:1", "/avt", None)]);
        let caps = ServiceEndpoints::resolve(&transport_only).capabilities();
        assert!(caps.contains(&Capability::Play));
        assert!(caps.contains(&Capability::Seek));
        assert!(!caps.contains(&Capability::VolumeSet));

        let rendering_only = description(vec![entry("urn:schemas-upnp-org:service:RenderingControl:1", "/rc", None)]);
        let caps = ServiceEndpoints::resolve(&rendering_only).capabilities();
        assert!(caps.contains(&Capability::MuteSubscribe));
        assert!(!caps.contains(&Capability::Play));
        assert_eq!(caps.len(), 7);
    }
}
