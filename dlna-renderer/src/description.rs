//! Device description supplied by discovery.
//!
//! Discovery itself is out of scope: callers either build a
//! [`ServiceDescription`] from what their discovery layer found, or hand the
//! fetched device description XML to [`ServiceDescription::from_xml`].

use std::net::IpAddr;

use serde::Deserialize;
use url::{Host, Position, Url};

use crate::error::RendererError;

/// One service advertised in a device description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service_type: String,
    /// `scheme://host:port` the relative URLs are resolved against
    pub base_url: String,
    pub control_url: String,
    pub event_sub_url: Option<String>,
}

impl ServiceEntry {
    pub fn new(
        service_type: impl Into<String>,
        base_url: impl Into<String>,
        control_url: impl Into<String>,
        event_sub_url: Option<String>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            base_url: base_url.into(),
            control_url: control_url.into(),
            event_sub_url,
        }
    }
}

/// What this crate needs to know about a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub ip_address: IpAddr,
    pub port: u16,
    pub friendly_name: Option<String>,
    /// In advertised order
    pub services: Vec<ServiceEntry>,
}

impl ServiceDescription {
    pub fn new(ip_address: IpAddr, port: u16) -> Self {
        Self {
            ip_address,
            port,
            friendly_name: None,
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: ServiceEntry) -> Self {
        self.services.push(service);
        self
    }

    /// `http://ip:port`, for building service entries by hand.
    pub fn base_url(&self) -> String {
        match self.ip_address {
            IpAddr::V4(ip) => format!("http://{ip}:{}", self.port),
            IpAddr::V6(ip) => format!("http://[{ip}]:{}", self.port),
        }
    }

    /// Parse a UPnP device description fetched from `location`.
    ///
    /// Services of embedded devices are included after the root device's.
    pub fn from_xml(location: &str, xml: &str) -> Result<Self, RendererError> {
        let location = Url::parse(location)
            .map_err(|e| RendererError::Description(format!("Invalid location {location:?}: {e}")))?;
        let ip_address = match location.host() {
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
            _ => {
                return Err(RendererError::Description(format!(
                    "Location {location} does not name an IP address"
                )))
            }
        };
        let port = location.port_or_known_default().unwrap_or(80);

        let root: Root = quick_xml::de::from_str(xml)
            .map_err(|e| RendererError::Description(format!("Failed to parse device XML: {e}")))?;

        let base_url = root
            .url_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| location[..Position::BeforePath].to_string());

        let mut services = Vec::new();
        collect_services(&root.device, &base_url, &mut services);

        Ok(Self {
            ip_address,
            port,
            friendly_name: root.device.friendly_name.clone(),
            services,
        })
    }
}

fn collect_services(device: &DeviceXml, base_url: &str, out: &mut Vec<ServiceEntry>) {
    if let Some(list) = &device.service_list {
        out.extend(list.services.iter().map(|s| ServiceEntry {
            service_type: s.service_type.trim().to_string(),
            base_url: base_url.to_string(),
            control_url: s.control_url.trim().to_string(),
            event_sub_url: s
                .event_sub_url
                .as_deref()
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_string),
        }));
    }
    if let Some(list) = &device.device_list {
        for embedded in &list.devices {
            collect_services(embedded, base_url, out);
        }
    }
}

#[derive(Debug, Deserialize)]
struct Root {
    #[serde(rename = "URLBase", default)]
    url_base: Option<String>,
    device: DeviceXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceXml {
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    service_list: Option<ServiceListXml>,
    #[serde(default)]
    device_list: Option<DeviceListXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceListXml {
    #[serde(rename = "service", default)]
    services: Vec<ServiceXml>,
}

#[derive(Debug, Deserialize)]
struct DeviceListXml {
    #[serde(rename = "device", default)]
    devices: Vec<DeviceXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceXml {
    #[serde(rename = "serviceType")]
    service_type: String,
    #[serde(rename = "controlURL")]
    control_url: String,
    #[serde(rename = "eventSubURL", default)]
    event_sub_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const RENDERER_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
    <specVersion><major>1</major><minor>0</minor></specVersion>
    <device>
        <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
        <friendlyName>Living Room TV</friendlyName>
        <manufacturer>Acme</manufacturer>
        <serviceList>
            <service>
                <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
                <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
                <SCPDURL>/cm.xml</SCPDURL>
                <controlURL>/ConnectionManager/Control</controlURL>
                <eventSubURL>/ConnectionManager/Event</eventSubURL>
            </service>
            <service>
                <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
                <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
                <SCPDURL>/avt.xml</SCPDURL>
                <controlURL>/AVTransport/Control</controlURL>
                <eventSubURL>/AVTransport/Event</eventSubURL>
            </service>
        </serviceList>
        <deviceList>
            <device>
                <deviceType>urn:schemas-upnp-org:device:Embedded:1</deviceType>
                <friendlyName>Embedded</friendlyName>
                <serviceList>
                    <service>
                        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
                        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
                        <SCPDURL>/rc.xml</SCPDURL>
                        <controlURL>/RenderingControl/Control</controlURL>
                        <eventSubURL>/RenderingControl/Event</eventSubURL>
                    </service>
                </serviceList>
            </device>
        </deviceList>
    </device>
</root>"#;

    #[test]
    fn test_from_xml() {
        let desc = ServiceDescription::from_xml("http://192.168.1.50:49152/description.xml", RENDERER_XML).unwrap();

        assert_eq!(desc.ip_address, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(desc.port, 49152);
        assert_eq!(desc.friendly_name.as_deref(), Some("Living Room TV"));
        assert_eq!(desc.services.len(), 3);

        let avt = &desc.services[1];
        assert_eq!(avt.service_type, "urn:schemas-upnp-org:service:AVTransport:1");
        assert_eq!(avt.base_url, "http://192.168.1.50:49152");
        assert_eq!(avt.control_url, "/AVTransport/Control");
        assert_eq!(avt.event_sub_url.as_deref(), Some("/AVTransport/Event"));

        assert_eq!(desc.services[2].control_url, "/RenderingControl/Control");
    }

    #[test]
    fn test_url_base_overrides_location() {
        let xml = r#"<root><URLBase>http://10.0.0.9:8080/</URLBase><device><friendlyName>X</friendlyName></device></root>"#;
        let desc = ServiceDescription::from_xml("http://10.0.0.9:1900/desc.xml", xml).unwrap();
        assert!(desc.services.is_empty());

        let xml = r#"<root><URLBase>http://10.0.0.9:8080/</URLBase><device><serviceList><service><serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType><controlURL>ctl</controlURL></service></serviceList></device></root>"#;
        let desc = ServiceDescription::from_xml("http://10.0.0.9:1900/desc.xml", xml).unwrap();
        assert_eq!(desc.services[0].base_url, "http://10.0.0.9:8080");
        assert_eq!(desc.services[0].event_sub_url, None);
    }

    #[test]
    fn test_from_xml_rejects_hostname_location() {
        let result = ServiceDescription::from_xml("http://renderer.local:1400/desc.xml", RENDERER_XML);
        assert!(matches!(result, Err(RendererError::Description(_))));
    }

    #[test]
    fn test_from_xml_rejects_malformed_xml() {
        let result = ServiceDescription::from_xml("http://10.0.0.9/desc.xml", "<root><device>");
        assert!(matches!(result, Err(RendererError::Description(_))));
    }

    #[test]
    fn test_base_url() {
        let v4 = ServiceDescription::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 1400);
        assert_eq!(v4.base_url(), "http://10.0.0.5:1400");
        let v6 = ServiceDescription::new("fe80::1".parse().unwrap(), 1400);
        assert_eq!(v6.base_url(), "http://[fe80::1]:1400");
    }
}
