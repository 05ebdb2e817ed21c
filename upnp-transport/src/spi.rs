//! Pluggable transport seams the router drives.
//!
//! Transports are created by a [`crate::UpnpServiceConfiguration`],
//! initialized once with `&mut self`, then shared: the router runs their
//! blocking loop on an executor thread and calls `stop` from another thread.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use upnp_model::{
    IncomingDatagramMessage, OutgoingDatagramMessage, StreamRequestMessage, StreamResponseMessage,
    UnsupportedDataError,
};

use crate::error::{InitializationError, ProtocolCreationError, TransportError};
use crate::network::NetworkInterface;
use crate::router::Router;

/// Enumerates interfaces and bind addresses and answers address questions.
pub trait NetworkAddressFactory: Send + Sync {
    fn multicast_group(&self) -> Ipv4Addr;
    fn multicast_port(&self) -> u16;
    fn stream_listen_port(&self) -> u16;
    fn multicast_response_port(&self) -> u16;
    fn network_interfaces(&self) -> Vec<NetworkInterface>;
    fn bind_addresses(&self) -> Vec<IpAddr>;
    fn has_usable_network(&self) -> bool;
    fn broadcast_address(&self, address: IpAddr) -> Option<Ipv4Addr>;
    fn network_prefix_length(&self, address: IpAddr) -> Option<u8>;

    /// Local address a datagram from `remote` was received on.
    fn local_address(&self, interface: &NetworkInterface, ipv6: bool, remote: IpAddr) -> Option<IpAddr>;

    fn interface_name(&self, address: IpAddr) -> Option<String>;
    fn hardware_address(&self, address: IpAddr) -> Option<Vec<u8>>;
}

/// Converts between datagram bytes and datagram messages.
pub trait DatagramProcessor: Send + Sync {
    fn read(
        &self,
        local_address: IpAddr,
        source: SocketAddr,
        data: &[u8],
    ) -> Result<IncomingDatagramMessage, UnsupportedDataError>;

    fn write(&self, message: &OutgoingDatagramMessage) -> Result<Bytes, UnsupportedDataError>;
}

/// Receives multicast datagrams on one interface.
pub trait MulticastReceiver: Send + Sync {
    fn init(
        &mut self,
        interface: &NetworkInterface,
        router: Arc<dyn Router>,
        address_factory: Arc<dyn NetworkAddressFactory>,
        processor: Arc<dyn DatagramProcessor>,
    ) -> Result<(), InitializationError>;

    /// Blocking receive loop; returns once stopped.
    fn run(&self);

    fn stop(&self) -> Result<(), TransportError>;
}

/// Sends datagrams and receives unicast datagrams on one bind address.
pub trait DatagramIo: Send + Sync {
    fn init(
        &mut self,
        bind_address: IpAddr,
        bind_port: u16,
        router: Arc<dyn Router>,
        processor: Arc<dyn DatagramProcessor>,
    ) -> Result<(), InitializationError>;

    /// Blocking receive loop; returns once stopped.
    fn run(&self);

    fn stop(&self) -> Result<(), TransportError>;

    fn send(&self, message: &OutgoingDatagramMessage);

    /// Send raw bytes.
    fn send_packet(&self, data: &[u8], destination: SocketAddr);
}

/// Accepts inbound stream requests on one bind address.
pub trait StreamServer: Send + Sync {
    /// Bind the listener. A bind conflict must be reported as
    /// [`InitializationError::Bind`].
    fn init(&mut self, bind_address: IpAddr, router: Arc<dyn Router>) -> Result<(), InitializationError>;

    /// Port actually bound, valid after `init`.
    fn port(&self) -> u16;

    /// Blocking accept loop; returns once stopped.
    fn run(&self);

    fn stop(&self) -> Result<(), TransportError>;
}

/// Sends outbound stream requests.
pub trait StreamClient: Send + Sync {
    /// `Ok(None)` when no response was received.
    fn send_request(
        &self,
        request: &StreamRequestMessage,
    ) -> Result<Option<StreamResponseMessage>, TransportError>;

    fn stop(&self) -> Result<(), TransportError>;
}

/// Protocol handling one received datagram, run fire-and-forget.
pub trait ReceivingAsync: Send {
    fn run(self: Box<Self>);
}

/// Protocol answering one inbound stream request.
pub trait ReceivingSync: Send {
    /// Produce the response, `None` for no response.
    fn execute(&mut self) -> Option<StreamResponseMessage>;

    fn response_sent(&mut self, _response: &StreamResponseMessage) {}

    fn response_exception(&mut self, _error: &TransportError) {}
}

/// Creates protocols for received messages.
pub trait ProtocolFactory: Send + Sync {
    /// `Ok(None)` when the message is intentionally ignored.
    fn create_receiving_async(
        &self,
        message: IncomingDatagramMessage,
    ) -> Result<Option<Box<dyn ReceivingAsync>>, ProtocolCreationError>;

    fn create_receiving_sync(
        &self,
        message: StreamRequestMessage,
    ) -> Result<Box<dyn ReceivingSync>, ProtocolCreationError>;
}

/// An inbound stream request bound to the connection that must receive its
/// response.
pub trait UpnpStream: Send {
    fn run(self: Box<Self>);
}
