//! Outbound HTTP requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Method;
use tracing::{debug, info, trace};
use upnp_model::{StreamRequestMessage, StreamResponseMessage, UpnpHeaders, UpnpResponse};

use crate::error::{InitializationError, TransportError};
use crate::spi::StreamClient;

/// Stream client over a blocking reqwest client.
///
/// Requests block the calling thread, so they must not be sent from inside
/// an async runtime. Protocol pool threads are fine.
#[derive(Debug)]
pub struct ReqwestStreamClient {
    client: Client,
    timeout: Duration,
    stopped: AtomicBool,
}

impl ReqwestStreamClient {
    pub fn new(timeout: Duration) -> Result<Self, InitializationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InitializationError::other("StreamClient", e.to_string()))?;
        Ok(Self {
            client,
            timeout,
            stopped: AtomicBool::new(false),
        })
    }
}

impl StreamClient for ReqwestStreamClient {
    fn send_request(
        &self,
        request: &StreamRequestMessage,
    ) -> Result<Option<StreamResponseMessage>, TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Stream client stopped, not sending: {}", request.uri);
            return Ok(None);
        }

        let method = Method::from_bytes(request.method.http_name().as_bytes())
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let mut builder = self.client.request(method, request.uri.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        trace!("Sending HTTP request: {} {}", request.method, request.uri);
        let response = match builder.body(request.body.to_vec()).send() {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                info!("Timeout of {:?} exceeded for request: {}", self.timeout, request.uri);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        let mut headers = UpnpHeaders::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.add(name.as_str(), value);
            }
        }
        let body = response.bytes()?;
        trace!("Received HTTP response: {}", status);

        let mut message = StreamResponseMessage::new(UpnpResponse::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
        ))
        .with_body(body);
        message.headers = headers;
        Ok(Some(message))
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
