//! Unicast UDP socket per bind address.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};
use upnp_model::OutgoingDatagramMessage;

use super::{is_timeout, RECEIVE_POLL_INTERVAL};
use crate::error::{InitializationError, TransportError};
use crate::router::Router;
use crate::spi::{DatagramIo, DatagramProcessor};

/// Kernel receive buffer of the unicast socket.
const RECEIVE_BUFFER_BYTES: usize = 262_144;

struct Bound {
    socket: UdpSocket,
    local_address: SocketAddr,
    router: Arc<dyn Router>,
    processor: Arc<dyn DatagramProcessor>,
}

/// Sends datagrams from, and receives unicast datagrams on, one address.
pub struct DatagramIoImpl {
    max_datagram_bytes: usize,
    multicast_ttl: u32,
    bound: Option<Bound>,
    stopped: AtomicBool,
}

impl DatagramIoImpl {
    pub fn new(max_datagram_bytes: usize, multicast_ttl: u32) -> Self {
        Self {
            max_datagram_bytes,
            multicast_ttl,
            bound: None,
            stopped: AtomicBool::new(false),
        }
    }

    /// Address the socket is bound to, after `init`.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.bound.as_ref().map(|b| b.local_address)
    }

    fn open_socket(&self, address: SocketAddr) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_recv_buffer_size(RECEIVE_BUFFER_BYTES)?;
        if address.is_ipv4() {
            socket.set_multicast_ttl_v4(self.multicast_ttl)?;
        }
        socket.bind(&address.into())?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECEIVE_POLL_INTERVAL))?;
        Ok(socket)
    }
}

impl DatagramIo for DatagramIoImpl {
    fn init(
        &mut self,
        bind_address: IpAddr,
        bind_port: u16,
        router: Arc<dyn Router>,
        processor: Arc<dyn DatagramProcessor>,
    ) -> Result<(), InitializationError> {
        let address = SocketAddr::new(bind_address, bind_port);
        debug!("Creating bound socket (for datagram input/output) on: {}", address);
        let socket = self
            .open_socket(address)
            .map_err(|e| InitializationError::from_bind("DatagramIO", address.to_string(), e))?;
        let local_address = socket
            .local_addr()
            .map_err(|e| InitializationError::other("DatagramIO", e.to_string()))?;

        self.bound = Some(Bound {
            socket,
            local_address,
            router,
            processor,
        });
        Ok(())
    }

    fn run(&self) {
        let Some(bound) = self.bound.as_ref() else {
            warn!("Datagram I/O was not initialized");
            return;
        };
        debug!("Entering blocking receiving loop, listening for UDP datagrams on: {}", bound.local_address);

        let mut buffer = vec![0u8; self.max_datagram_bytes];
        while !self.stopped.load(Ordering::SeqCst) {
            match bound.socket.recv_from(&mut buffer) {
                Ok((len, source)) => {
                    trace!("UDP datagram received from: {} on: {}", source, bound.local_address);
                    match bound.processor.read(bound.local_address.ip(), source, &buffer[..len]) {
                        Ok(message) => bound.router.received_datagram(message),
                        Err(e) => info!("Could not read datagram: {}", e),
                    }
                }
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    if !self.stopped.load(Ordering::SeqCst) {
                        debug!("Socket on {} closed: {}", bound.local_address, e);
                    }
                    break;
                }
            }
        }
        debug!("Stopped receiving datagrams on: {}", bound.local_address);
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, message: &OutgoingDatagramMessage) {
        let Some(bound) = self.bound.as_ref() else {
            return;
        };
        trace!("Sending message from address: {}", bound.local_address);
        match bound.processor.write(message) {
            Ok(bytes) => self.send_packet(&bytes, message.destination),
            Err(e) => warn!("Could not write datagram to {}: {}", message.destination, e),
        }
    }

    fn send_packet(&self, data: &[u8], destination: SocketAddr) {
        let Some(bound) = self.bound.as_ref() else {
            return;
        };
        trace!("Sending {} bytes to {}", data.len(), destination);
        if let Err(e) = bound.socket.send_to(data, destination) {
            if self.stopped.load(Ordering::SeqCst) {
                trace!("Socket closed, not sending to {}: {}", destination, e);
            } else {
                warn!("Exception sending datagram to {}: {}", destination, e);
            }
        }
    }
}

impl std::fmt::Debug for DatagramIoImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramIoImpl")
            .field("local_address", &self.local_address())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
