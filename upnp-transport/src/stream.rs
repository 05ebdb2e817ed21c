//! Processing of inbound stream requests through synchronous protocols.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use upnp_model::{StreamRequestMessage, StreamResponseMessage, UpnpResponse};

use crate::error::TransportError;
use crate::spi::{ProtocolFactory, ReceivingSync};

/// Runs the protocol for one stream request and forwards delivery outcomes
/// to it.
pub struct StreamProcessor {
    protocol_factory: Arc<dyn ProtocolFactory>,
    protocol: Option<Box<dyn ReceivingSync>>,
}

impl StreamProcessor {
    pub fn new(protocol_factory: Arc<dyn ProtocolFactory>) -> Self {
        Self {
            protocol_factory,
            protocol: None,
        }
    }

    /// Response for `request`, `None` if the protocol produced none.
    ///
    /// A request no protocol can be created for is answered with
    /// `501 Not Implemented`.
    pub fn process(&mut self, request: StreamRequestMessage) -> Option<StreamResponseMessage> {
        debug!("Processing stream request message: {} {}", request.method, request.uri);

        let mut protocol = match self.protocol_factory.create_receiving_sync(request) {
            Ok(protocol) => protocol,
            Err(e) => {
                warn!("Processing stream request failed - {}", e);
                return Some(StreamResponseMessage::new(UpnpResponse::not_implemented()));
            }
        };

        trace!("Running protocol for synchronous message processing");
        let response = protocol.execute();
        self.protocol = Some(protocol);

        match &response {
            Some(r) => trace!("Protocol returned response: {}", r.response),
            None => trace!("Protocol did not return any response message"),
        }
        response
    }

    pub fn response_sent(&mut self, response: &StreamResponseMessage) {
        if let Some(protocol) = self.protocol.as_mut() {
            protocol.response_sent(response);
        }
    }

    pub fn response_exception(&mut self, error: &TransportError) {
        if let Some(protocol) = self.protocol.as_mut() {
            protocol.response_exception(error);
        }
    }
}

/// One-shot form of [`StreamProcessor::process`].
pub fn process_stream_request(
    protocol_factory: Arc<dyn ProtocolFactory>,
    request: StreamRequestMessage,
) -> Option<StreamResponseMessage> {
    StreamProcessor::new(protocol_factory).process(request)
}
