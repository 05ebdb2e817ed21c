//! HTTP-over-UDP datagram reading and writing.

use std::net::{IpAddr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;
use upnp_model::{
    IncomingDatagramMessage, OutgoingDatagramMessage, UnsupportedDataError, UpnpHeaders,
    UpnpOperation, UpnpRequest, UpnpRequestMethod, UpnpResponse,
};

use crate::spi::DatagramProcessor;

/// Reads a request line or status line followed by headers; anything after
/// the blank line is the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDatagramProcessor;

fn minor_version(protocol: &str) -> Option<u8> {
    match protocol.trim().to_ascii_uppercase().as_str() {
        "HTTP/1.1" => Some(1),
        "HTTP/1.0" => Some(0),
        _ => None,
    }
}

fn unsupported(message: impl Into<String>, data: &[u8]) -> UnsupportedDataError {
    UnsupportedDataError::with_data(message, String::from_utf8_lossy(data))
}

impl DefaultDatagramProcessor {
    fn read_operation(start_line: &str) -> Option<UpnpOperation> {
        let mut parts = start_line.splitn(3, ' ');
        let first = parts.next()?;
        let second = parts.next()?;
        let third = parts.next().unwrap_or_default();

        if first.to_ascii_uppercase().starts_with("HTTP/1.") {
            let status_code = second.parse().ok()?;
            let mut response = UpnpResponse::new(status_code, third.trim());
            response.http_minor_version = minor_version(first)?;
            Some(UpnpOperation::Response(response))
        } else {
            let mut request = UpnpRequest::new(UpnpRequestMethod::from_http_name(first), second);
            request.http_minor_version = minor_version(third)?;
            Some(UpnpOperation::Request(request))
        }
    }
}

impl DatagramProcessor for DefaultDatagramProcessor {
    fn read(
        &self,
        local_address: IpAddr,
        source: SocketAddr,
        data: &[u8],
    ) -> Result<IncomingDatagramMessage, UnsupportedDataError> {
        trace!("Reading {} bytes datagram from {}", data.len(), source);

        let (head, body) = match find_subsequence(data, b"\r\n\r\n") {
            Some(end) => (&data[..end], &data[end + 4..]),
            None => (data, &data[data.len()..]),
        };
        let head = std::str::from_utf8(head)
            .map_err(|_| unsupported("Datagram headers are not valid text", data))?;

        let mut lines = head.split("\r\n");
        let start_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| unsupported("Could not parse headers", data))?;
        let operation = Self::read_operation(start_line)
            .ok_or_else(|| unsupported("Could not parse headers", data))?;

        let mut headers = UpnpHeaders::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| unsupported(format!("Invalid header line: {}", line), data))?;
            headers.add(name.trim(), value.trim());
        }

        Ok(IncomingDatagramMessage {
            operation,
            headers,
            body: Bytes::copy_from_slice(body),
            source_address: source,
            local_address,
        })
    }

    fn write(&self, message: &OutgoingDatagramMessage) -> Result<Bytes, UnsupportedDataError> {
        let start_line = match &message.operation {
            UpnpOperation::Request(request) => format!(
                "{} {} HTTP/1.{}\r\n",
                request.method.http_name(),
                request.uri,
                request.http_minor_version
            ),
            UpnpOperation::Response(response) => format!(
                "HTTP/1.{} {} {}\r\n",
                response.http_minor_version, response.status_code, response.status_message
            ),
        };

        let mut out = BytesMut::with_capacity(start_line.len() + 256 + message.body.len());
        out.put_slice(start_line.as_bytes());
        for (name, value) in message.headers.iter() {
            if !name.is_ascii() || !value.is_ascii() {
                return Err(UnsupportedDataError::new(format!(
                    "Header {} is not US-ASCII",
                    name
                )));
            }
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
        out.put_slice(&message.body);

        trace!("Writing new datagram with {} bytes to {}", out.len(), message.destination);
        Ok(out.freeze())
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
