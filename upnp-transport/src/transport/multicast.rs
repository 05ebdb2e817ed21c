//! Multicast group membership per network interface.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use super::{is_timeout, RECEIVE_POLL_INTERVAL};
use crate::error::{InitializationError, TransportError};
use crate::network::NetworkInterface;
use crate::router::Router;
use crate::spi::{DatagramProcessor, MulticastReceiver, NetworkAddressFactory};

const RECEIVE_BUFFER_BYTES: usize = 32_768;

struct Joined {
    socket: UdpSocket,
    interface: NetworkInterface,
    group: Ipv4Addr,
    interface_address: Ipv4Addr,
    router: Arc<dyn Router>,
    address_factory: Arc<dyn NetworkAddressFactory>,
    processor: Arc<dyn DatagramProcessor>,
}

/// Listens on the multicast port and joins the group on one interface.
///
/// Several receivers share the port through address reuse.
pub struct MulticastReceiverImpl {
    max_datagram_bytes: usize,
    joined: Option<Joined>,
    stopped: AtomicBool,
}

impl MulticastReceiverImpl {
    pub fn new(max_datagram_bytes: usize) -> Self {
        Self {
            max_datagram_bytes,
            joined: None,
            stopped: AtomicBool::new(false),
        }
    }

    fn open_socket(port: u16, group: Ipv4Addr, interface_address: Ipv4Addr) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(RECEIVE_BUFFER_BYTES)?;
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&address.into())?;
        socket.join_multicast_v4(&group, &interface_address)?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECEIVE_POLL_INTERVAL))?;
        Ok(socket)
    }
}

impl MulticastReceiver for MulticastReceiverImpl {
    fn init(
        &mut self,
        interface: &NetworkInterface,
        router: Arc<dyn Router>,
        address_factory: Arc<dyn NetworkAddressFactory>,
        processor: Arc<dyn DatagramProcessor>,
    ) -> Result<(), InitializationError> {
        let interface_address = interface.ipv4_address().ok_or_else(|| {
            InitializationError::other(
                "MulticastReceiver",
                format!("Interface {} has no IPv4 address", interface.name),
            )
        })?;
        let group = address_factory.multicast_group();
        let port = address_factory.multicast_port();

        debug!("Creating wildcard socket (for receiving multicast datagrams) on port: {}", port);
        debug!("Joining multicast group: {} on network interface: {}", group, interface.name);
        let socket = Self::open_socket(port, group, interface_address).map_err(|e| {
            InitializationError::from_bind("MulticastReceiver", format!("{}:{}", group, port), e)
        })?;

        self.joined = Some(Joined {
            socket,
            interface: interface.clone(),
            group,
            interface_address,
            router,
            address_factory,
            processor,
        });
        Ok(())
    }

    fn run(&self) {
        let Some(joined) = self.joined.as_ref() else {
            warn!("Multicast receiver was not initialized");
            return;
        };
        debug!(
            "Entering blocking receiving loop, listening for UDP datagrams on: {}",
            joined.interface.name
        );

        let mut buffer = vec![0u8; self.max_datagram_bytes];
        while !self.stopped.load(Ordering::SeqCst) {
            let (len, source) = match joined.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    if !self.stopped.load(Ordering::SeqCst) {
                        debug!("Multicast socket on {} closed: {}", joined.interface.name, e);
                    }
                    break;
                }
            };

            let Some(local_address) =
                joined
                    .address_factory
                    .local_address(&joined.interface, source.is_ipv6(), source.ip())
            else {
                debug!("No local address on {} for datagram from {}", joined.interface.name, source);
                continue;
            };

            trace!("UDP datagram received from: {} on local interface: {}", source, joined.interface.name);
            match joined.processor.read(local_address, source, &buffer[..len]) {
                Ok(message) => joined.router.received_datagram(message),
                Err(e) => info!("Could not read datagram: {}", e),
            }
        }
        debug!("Stopped receiving multicast on: {}", joined.interface.name);
    }

    fn stop(&self) -> Result<(), TransportError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(joined) = self.joined.as_ref() {
            debug!("Leaving multicast group: {} on {}", joined.group, joined.interface.name);
            joined
                .socket
                .leave_multicast_v4(&joined.group, &joined.interface_address)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MulticastReceiverImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastReceiverImpl")
            .field("interface", &self.joined.as_ref().map(|j| j.interface.name.as_str()))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
