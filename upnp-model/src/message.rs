//! Message carriers routed by the transport layer.
//!
//! Bodies are opaque bytes. Only the request line or status line and the
//! headers are typed, which is all the router needs.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use url::Url;

/// HTTP-style headers with case-insensitive lookup, kept in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpnpHeaders {
    entries: Vec<(String, String)>,
}

impl UpnpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping existing values of the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all values of `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for UpnpHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = UpnpHeaders::new();
        for (n, v) in iter {
            headers.add(n, v);
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpnpRequestMethod {
    Get,
    Post,
    Notify,
    MSearch,
    Subscribe,
    Unsubscribe,
    Unknown(String),
}

impl UpnpRequestMethod {
    pub fn from_http_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "GET" => UpnpRequestMethod::Get,
            "POST" => UpnpRequestMethod::Post,
            "NOTIFY" => UpnpRequestMethod::Notify,
            "M-SEARCH" => UpnpRequestMethod::MSearch,
            "SUBSCRIBE" => UpnpRequestMethod::Subscribe,
            "UNSUBSCRIBE" => UpnpRequestMethod::Unsubscribe,
            _ => UpnpRequestMethod::Unknown(name.to_string()),
        }
    }

    pub fn http_name(&self) -> &str {
        match self {
            UpnpRequestMethod::Get => "GET",
            UpnpRequestMethod::Post => "POST",
            UpnpRequestMethod::Notify => "NOTIFY",
            UpnpRequestMethod::MSearch => "M-SEARCH",
            UpnpRequestMethod::Subscribe => "SUBSCRIBE",
            UpnpRequestMethod::Unsubscribe => "UNSUBSCRIBE",
            UpnpRequestMethod::Unknown(name) => name,
        }
    }
}

impl fmt::Display for UpnpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.http_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpRequest {
    pub method: UpnpRequestMethod,
    /// Request target as it appeared on the request line, `*` for SSDP.
    pub uri: String,
    pub http_minor_version: u8,
}

impl UpnpRequest {
    pub fn new(method: UpnpRequestMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            http_minor_version: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpResponse {
    pub status_code: u16,
    pub status_message: String,
    pub http_minor_version: u8,
}

impl UpnpResponse {
    pub fn new(status_code: u16, status_message: impl Into<String>) -> Self {
        Self {
            status_code,
            status_message: status_message.into(),
            http_minor_version: 1,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn internal_server_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    pub fn is_failed(&self) -> bool {
        self.status_code >= 300
    }
}

impl fmt::Display for UpnpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code, self.status_message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpnpOperation {
    Request(UpnpRequest),
    Response(UpnpResponse),
}

/// A datagram received on one of the local sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingDatagramMessage {
    pub operation: UpnpOperation,
    pub headers: UpnpHeaders,
    pub body: Bytes,
    pub source_address: SocketAddr,
    /// Local address the datagram arrived on.
    pub local_address: IpAddr,
}

/// A datagram to be sent to a unicast or multicast destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDatagramMessage {
    pub operation: UpnpOperation,
    pub headers: UpnpHeaders,
    pub body: Bytes,
    pub destination: SocketAddr,
}

impl OutgoingDatagramMessage {
    pub fn new(operation: UpnpOperation, destination: SocketAddr) -> Self {
        Self {
            operation,
            headers: UpnpHeaders::new(),
            body: Bytes::new(),
            destination,
        }
    }
}

/// Peer details of an inbound stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConnection {
    /// Peer address, when the server can tell.
    pub remote_address: Option<SocketAddr>,
    pub local_address: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequestMessage {
    pub method: UpnpRequestMethod,
    pub uri: Url,
    pub headers: UpnpHeaders,
    pub body: Bytes,
    pub connection: Option<StreamConnection>,
}

impl StreamRequestMessage {
    pub fn new(method: UpnpRequestMethod, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: UpnpHeaders::new(),
            body: Bytes::new(),
            connection: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResponseMessage {
    pub response: UpnpResponse,
    pub headers: UpnpHeaders,
    pub body: Bytes,
}

impl StreamResponseMessage {
    pub fn new(response: UpnpResponse) -> Self {
        Self {
            response,
            headers: UpnpHeaders::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = UpnpHeaders::new();
        headers.add("SID", "uuid:abc");
        headers.add("NT", "upnp:event");
        assert_eq!(headers.get("sid"), Some("uuid:abc"));
        assert!(headers.contains("nt"));
        assert_eq!(headers.get("SEQ"), None);
    }

    #[test]
    fn test_headers_set_replaces_all_values() {
        let mut headers: UpnpHeaders = [("Callback", "<a>"), ("CALLBACK", "<b>")]
            .into_iter()
            .collect();
        assert_eq!(headers.get_all("callback").count(), 2);
        headers.set("callback", "<c>");
        assert_eq!(headers.get_all("Callback").collect::<Vec<_>>(), vec!["<c>"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_request_method_names() {
        assert_eq!(UpnpRequestMethod::from_http_name("m-search"), UpnpRequestMethod::MSearch);
        assert_eq!(UpnpRequestMethod::Subscribe.http_name(), "SUBSCRIBE");
        assert_eq!(
            UpnpRequestMethod::from_http_name("BREW").http_name(),
            "BREW"
        );
    }

    #[test]
    fn test_response_failure() {
        assert!(!UpnpResponse::ok().is_failed());
        assert!(UpnpResponse::not_implemented().is_failed());
        assert_eq!(UpnpResponse::new(412, "Precondition Failed").to_string(), "412 Precondition Failed");
    }
}
