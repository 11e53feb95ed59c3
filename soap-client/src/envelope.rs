//! SOAP 1.1 request envelopes for UPnP control actions.

/// A single control action, built per call and never persisted.
///
/// Parameters keep their insertion order; UPnP devices are picky about the
/// argument order declared in the service's SCPD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapAction {
    pub service_urn: String,
    pub action_name: String,
    pub instance_id: String,
    pub parameters: Vec<(String, String)>,
}

impl SoapAction {
    /// Create an action against instance `0`, the only instance a renderer
    /// exposes in practice.
    pub fn new(service_urn: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            service_urn: service_urn.into(),
            action_name: action_name.into(),
            instance_id: "0".to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Append a parameter. Values are inserted verbatim, so anything that
    /// may contain markup must already be escaped.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Value of the `SOAPAction` header, quotes included.
    pub fn soap_action_header(&self) -> String {
        format!("\"{}#{}\"", self.service_urn, self.action_name)
    }

    pub fn envelope(&self) -> String {
        build_envelope(
            &self.service_urn,
            &self.action_name,
            &self.instance_id,
            &self.parameters,
        )
    }
}

/// Build a SOAP 1.1 envelope whose body is `<u:{action}>` in the `urn`
/// namespace, holding `InstanceID` followed by each parameter in order.
pub fn build_envelope<K, V>(
    service_urn: &str,
    action_name: &str,
    instance_id: &str,
    parameters: &[(K, V)],
) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut args = format!("<InstanceID>{instance_id}</InstanceID>");
    for (name, value) in parameters {
        let name = name.as_ref();
        args.push_str(&format!("<{name}>{}</{name}>", value.as_ref()));
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            r#"<s:Body><u:{action} xmlns:u="{urn}">{args}</u:{action}></s:Body>"#,
            r#"</s:Envelope>"#
        ),
        action = action_name,
        urn = service_urn,
        args = args
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmltree::Element;

    const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

    #[test]
    fn test_envelope_is_well_formed() {
        let envelope = build_envelope(AV_TRANSPORT, "Play", "0", &[("Speed", "1")]);
        let root = Element::parse(envelope.as_bytes()).unwrap();

        let body = root.get_child("Body").unwrap();
        let action = body.get_child("Play").unwrap();
        assert_eq!(action.namespace.as_deref(), Some(AV_TRANSPORT));
        assert_eq!(
            action.get_child("InstanceID").unwrap().get_text().unwrap(),
            "0"
        );
        assert_eq!(action.get_child("Speed").unwrap().get_text().unwrap(), "1");
    }

    #[test]
    fn test_parameters_keep_insertion_order() {
        let action = SoapAction::new(AV_TRANSPORT, "Seek")
            .param("Unit", "REL_TIME")
            .param("Target", "00:01:30");
        let envelope = action.envelope();

        let instance = envelope.find("<InstanceID>").unwrap();
        let unit = envelope.find("<Unit>").unwrap();
        let target = envelope.find("<Target>").unwrap();
        assert!(instance < unit && unit < target);
        assert!(envelope.contains("<Target>00:01:30</Target>"));
    }

    #[test]
    fn test_values_are_inserted_verbatim() {
        let envelope = build_envelope(
            AV_TRANSPORT,
            "SetAVTransportURI",
            "0",
            &[("CurrentURIMetaData", "&lt;DIDL-Lite&gt;")],
        );
        assert!(envelope.contains("<CurrentURIMetaData>&lt;DIDL-Lite&gt;</CurrentURIMetaData>"));
    }

    #[test]
    fn test_soap_action_header() {
        let action = SoapAction::new(AV_TRANSPORT, "Pause").instance_id("1");
        assert_eq!(
            action.soap_action_header(),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Pause\""
        );
        assert!(action.envelope().contains("<InstanceID>1</InstanceID>"));
    }
}
