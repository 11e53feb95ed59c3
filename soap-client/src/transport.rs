//! Blocking HTTP transport used for control and eventing requests.
//!
//! UPnP needs the non-standard `SUBSCRIBE`/`UNSUBSCRIBE` methods and must see
//! non-200 responses as responses rather than errors, so the client talks to
//! the network through this small seam instead of a concrete HTTP library.

use std::time::Duration;

use crate::SoapError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Executes one HTTP exchange.
///
/// Implementations return `Ok` for every response that has a status line,
/// whatever the status; `Err(SoapError::Network)` is reserved for failures
/// where no response was received.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, SoapError>;
}

/// [`HttpTransport`] backed by a `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(connect_timeout)
                .timeout_read(read_timeout)
                .build(),
        }
    }

    fn read_response(response: ureq::Response) -> Result<HttpResponse, SoapError> {
        let status = response.status();
        let headers = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();
        let body = response
            .into_string()
            .map_err(|e| SoapError::Network(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(10))
    }
}

impl HttpTransport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, SoapError> {
        let mut call = self.agent.request(&request.method, &request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let result = match &request.body {
            Some(body) => call.send_string(body),
            None => call.call(),
        };

        match result {
            Ok(response) => Self::read_response(response),
            Err(ureq::Error::Status(_, response)) => Self::read_response(response),
            Err(ureq::Error::Transport(e)) => Err(SoapError::Network(e.to_string())),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "test-support"))]
mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::{HttpRequest, HttpResponse, HttpTransport};
    use crate::SoapError;

    /// Scripted transport that records every request.
    ///
    /// Responses are keyed by the SOAP action name for control requests
    /// (taken from the `SOAPAction` header) and by the HTTP method for
    /// everything else. Queued responses are consumed in order; once a
    /// queue is empty the key's fallback is used, then a bare 200.
    #[derive(Default)]
    pub struct MockTransport {
        queued: Mutex<HashMap<String, VecDeque<Result<HttpResponse, SoapError>>>>,
        fallback: Mutex<HashMap<String, Result<HttpResponse, SoapError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a one-shot response for `key`.
        pub fn enqueue(&self, key: &str, response: Result<HttpResponse, SoapError>) {
            lock(&self.queued)
                .entry(key.to_string())
                .or_default()
                .push_back(response);
        }

        /// Response used for `key` whenever its queue is empty.
        pub fn respond(&self, key: &str, response: Result<HttpResponse, SoapError>) {
            lock(&self.fallback).insert(key.to_string(), response);
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            lock(&self.requests).clone()
        }

        pub fn call_count(&self) -> usize {
            lock(&self.requests).len()
        }

        /// Requests whose key (action name or method) equals `key`.
        pub fn requests_for(&self, key: &str) -> Vec<HttpRequest> {
            lock(&self.requests)
                .iter()
                .filter(|r| request_key(r) == key)
                .cloned()
                .collect()
        }
    }

    impl HttpTransport for MockTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, SoapError> {
            lock(&self.requests).push(request.clone());
            let key = request_key(request);

            if let Some(response) = lock(&self.queued).get_mut(&key).and_then(VecDeque::pop_front) {
                return response;
            }
            lock(&self.fallback)
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(200)))
        }
    }

    fn request_key(request: &HttpRequest) -> String {
        request
            .get_header("SOAPAction")
            .and_then(|value| value.trim_matches('"').rsplit('#').next())
            .map(str::to_string)
            .unwrap_or_else(|| request.method.clone())
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200).with_header("sid", "uuid:abc");
        assert_eq!(response.header("SID"), Some("uuid:abc"));
        assert_eq!(response.header("TIMEOUT"), None);

        let request = HttpRequest::new("POST", "http://host/ctl").header("SOAPAction", "\"x#Play\"");
        assert_eq!(request.get_header("soapaction"), Some("\"x#Play\""));
    }

    #[test]
    fn test_ureq_transport_returns_non_200_as_response() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/ctl")
            .with_status(500)
            .with_body("<fault/>")
            .create();

        let transport = UreqTransport::default();
        let request = HttpRequest::new("POST", format!("{}/ctl", server.url())).body("<x/>");
        let response = transport.execute(&request).unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(response.body, "<fault/>");
        mock.assert();
    }

    #[test]
    fn test_ureq_transport_sends_custom_method_and_headers() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("SUBSCRIBE", "/evt")
            .match_header("NT", "upnp:event")
            .with_status(200)
            .with_header("SID", "uuid:1234")
            .create();

        let transport = UreqTransport::default();
        let request = HttpRequest::new("SUBSCRIBE", format!("{}/evt", server.url()))
            .header("NT", "upnp:event");
        let response = transport.execute(&request).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.header("sid"), Some("uuid:1234"));
        mock.assert();
    }

    #[test]
    fn test_ureq_transport_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = UreqTransport::default();
        let request = HttpRequest::new("POST", format!("http://127.0.0.1:{port}/ctl"));
        assert!(matches!(transport.execute(&request), Err(SoapError::Network(_))));
    }

    #[test]
    fn test_mock_transport_scripting() {
        let mock = MockTransport::new();
        mock.enqueue("GetVolume", Ok(HttpResponse::new(200).with_body("first")));
        mock.respond("GetVolume", Ok(HttpResponse::new(200).with_body("always")));

        let request = HttpRequest::new("POST", "http://host/ctl")
            .header("SOAPAction", "\"urn:x#GetVolume\"");
        assert_eq!(mock.execute(&request).unwrap().body, "first");
        assert_eq!(mock.execute(&request).unwrap().body, "always");
        assert_eq!(mock.execute(&HttpRequest::new("UNSUBSCRIBE", "u")).unwrap().status, 200);
        assert_eq!(mock.requests_for("GetVolume").len(), 2);
        assert_eq!(mock.call_count(), 3);
    }
}
