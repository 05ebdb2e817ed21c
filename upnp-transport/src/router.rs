//! The network router.
//!
//! [`RouterImpl`] owns every transport of the stack. Enabling starts a
//! multicast receiver per usable interface and a stream server plus
//! datagram I/O per bind address, then creates the single stream client.
//! Disabling stops them in reverse dependency order. Both transitions run
//! under the write side of one coarse lock; sends and server queries take
//! the read side. Received messages are dispatched without the lock.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, trace, warn};
use upnp_model::{
    IncomingDatagramMessage, NetworkAddress, OutgoingDatagramMessage, StreamRequestMessage,
    StreamResponseMessage,
};

use crate::configuration::UpnpServiceConfiguration;
use crate::error::{InitializationError, Result, RouterError, TransportError};
use crate::network::NetworkInterface;
use crate::spi::{
    DatagramIo, MulticastReceiver, NetworkAddressFactory, ProtocolFactory, StreamClient,
    StreamServer, UpnpStream,
};

/// Port raw broadcast packets are sent to.
pub const BROADCAST_PORT: u16 = 9;

/// Owner of network transports and dispatcher of received messages.
pub trait Router: Send + Sync {
    fn configuration(&self) -> &Arc<dyn UpnpServiceConfiguration>;

    fn protocol_factory(&self) -> &Arc<dyn ProtocolFactory>;

    /// Start all transports. `Ok(false)` if already enabled or if
    /// initialization failed and the failure was handled.
    fn enable(&self) -> Result<bool>;

    /// Stop all transports. `Ok(false)` if already disabled.
    fn disable(&self) -> Result<bool>;

    fn shutdown(&self) -> Result<()>;

    fn is_enabled(&self) -> bool;

    /// Addresses of running stream servers. If `preferred` has a server,
    /// only that one is returned.
    fn active_stream_servers(&self, preferred: Option<IpAddr>) -> Result<Vec<NetworkAddress>>;

    fn received_datagram(&self, message: IncomingDatagramMessage);

    fn received_stream(&self, stream: Box<dyn UpnpStream>);

    /// Send through every datagram I/O.
    fn send_datagram(&self, message: &OutgoingDatagramMessage) -> Result<()>;

    /// `Ok(None)` when disabled, without a client or without a response.
    fn send_stream(&self, request: &StreamRequestMessage) -> Result<Option<StreamResponseMessage>>;

    /// Send raw bytes to the subnet broadcast address of every bind address.
    fn broadcast(&self, bytes: &[u8]) -> Result<()>;
}

type StartFailureHandler = Box<dyn Fn(InitializationError) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct RouterState {
    enabled: bool,
    address_factory: Option<Arc<dyn NetworkAddressFactory>>,
    stream_client: Option<Box<dyn StreamClient>>,
    multicast_receivers: Vec<(NetworkInterface, Arc<dyn MulticastReceiver>)>,
    stream_servers: Vec<(IpAddr, Arc<dyn StreamServer>)>,
    datagram_ios: Vec<(IpAddr, Arc<dyn DatagramIo>)>,
    unusable_addresses: Vec<IpAddr>,
}

/// Builder for [`RouterImpl`].
pub struct RouterBuilder {
    configuration: Arc<dyn UpnpServiceConfiguration>,
    protocol_factory: Arc<dyn ProtocolFactory>,
    start_failure_handler: Option<StartFailureHandler>,
}

impl RouterBuilder {
    /// Replace the default handling of initialization failures.
    pub fn start_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(InitializationError) -> Result<()> + Send + Sync + 'static,
    {
        self.start_failure_handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Arc<RouterImpl> {
        let lock_timeout = self.configuration.router_lock_timeout();
        Arc::new_cyclic(|weak_self| RouterImpl {
            configuration: self.configuration,
            protocol_factory: self.protocol_factory,
            state: RwLock::new(RouterState::default()),
            enabled: AtomicBool::new(false),
            lock_timeout,
            start_failure_handler: self.start_failure_handler,
            weak_self: weak_self.clone(),
        })
    }
}

/// Default router.
pub struct RouterImpl {
    configuration: Arc<dyn UpnpServiceConfiguration>,
    protocol_factory: Arc<dyn ProtocolFactory>,
    state: RwLock<RouterState>,
    enabled: AtomicBool,
    lock_timeout: Duration,
    start_failure_handler: Option<StartFailureHandler>,
    weak_self: Weak<RouterImpl>,
}

impl RouterImpl {
    pub fn new(
        configuration: Arc<dyn UpnpServiceConfiguration>,
        protocol_factory: Arc<dyn ProtocolFactory>,
    ) -> Arc<Self> {
        Self::builder(configuration, protocol_factory).build()
    }

    pub fn builder(
        configuration: Arc<dyn UpnpServiceConfiguration>,
        protocol_factory: Arc<dyn ProtocolFactory>,
    ) -> RouterBuilder {
        RouterBuilder {
            configuration,
            protocol_factory,
            start_failure_handler: None,
        }
    }

    /// Bind addresses dropped for bind conflicts during the last enable.
    pub fn unusable_addresses(&self) -> Result<Vec<IpAddr>> {
        Ok(self.read_lock()?.unusable_addresses.clone())
    }

    /// Decide what an initialization failure means for the caller.
    ///
    /// No usable network is an error; anything else is logged and leaves
    /// the router disabled.
    pub fn handle_start_failure(&self, error: InitializationError) -> Result<()> {
        if let Some(handler) = &self.start_failure_handler {
            return handler(error);
        }
        match error {
            InitializationError::NoNetwork(message) => {
                info!("Unable to initialize network router, no network found.");
                Err(RouterError::NoNetwork(message))
            }
            other => {
                error!("Unable to initialize network router: {}", other);
                if let Some(cause) = std::error::Error::source(&other) {
                    error!("Cause: {}", cause);
                }
                Ok(())
            }
        }
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, RouterState>> {
        trace!(
            "Trying to obtain write lock with timeout milliseconds '{}'",
            self.lock_timeout.as_millis()
        );
        let guard = self
            .state
            .try_write_for(self.lock_timeout)
            .ok_or(RouterError::LockTimeout(self.lock_timeout.as_millis() as u64))?;
        trace!("Acquired write lock");
        Ok(guard)
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, RouterState>> {
        trace!(
            "Trying to obtain read lock with timeout milliseconds '{}'",
            self.lock_timeout.as_millis()
        );
        let guard = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or(RouterError::LockTimeout(self.lock_timeout.as_millis() as u64))?;
        trace!("Acquired read lock");
        Ok(guard)
    }

    fn start(&self, state: &mut RouterState) -> std::result::Result<(), InitializationError> {
        let router: Arc<dyn Router> = self
            .weak_self
            .upgrade()
            .ok_or_else(|| InitializationError::other("Router", "router is being dropped"))?;

        let address_factory = self.configuration.create_network_address_factory()?;
        state.address_factory = Some(Arc::clone(&address_factory));
        state.unusable_addresses.clear();

        self.start_interface_based_transports(state, &address_factory, &router)?;
        self.start_address_based_transports(state, &address_factory, &router)?;

        let surviving = address_factory
            .bind_addresses()
            .into_iter()
            .filter(|a| !state.unusable_addresses.contains(a))
            .count();
        if !address_factory.has_usable_network() || surviving == 0 {
            return Err(InitializationError::NoNetwork(
                "No usable network interface and/or addresses available, check the log for errors."
                    .to_string(),
            ));
        }

        state.stream_client = Some(self.configuration.create_stream_client()?);
        Ok(())
    }

    fn start_interface_based_transports(
        &self,
        state: &mut RouterState,
        address_factory: &Arc<dyn NetworkAddressFactory>,
        router: &Arc<dyn Router>,
    ) -> std::result::Result<(), InitializationError> {
        for interface in address_factory.network_interfaces() {
            let Some(mut receiver) = self.configuration.create_multicast_receiver(address_factory.as_ref())
            else {
                info!("Configuration did not create a MulticastReceiver for: {}", interface.name);
                continue;
            };
            debug!("Init multicast receiver on interface: {}", interface.name);
            receiver.init(
                &interface,
                Arc::clone(router),
                Arc::clone(address_factory),
                self.configuration.datagram_processor(),
            )?;
            state.multicast_receivers.push((interface, Arc::from(receiver)));
        }

        let executor = self.configuration.multicast_receiver_executor();
        for (interface, receiver) in &state.multicast_receivers {
            debug!("Starting multicast receiver on interface: {}", interface.name);
            let receiver = Arc::clone(receiver);
            executor
                .execute(Box::new(move || receiver.run()))
                .map_err(|e| InitializationError::other("MulticastReceiver", e.to_string()))?;
        }
        Ok(())
    }

    fn start_address_based_transports(
        &self,
        state: &mut RouterState,
        address_factory: &Arc<dyn NetworkAddressFactory>,
        router: &Arc<dyn Router>,
    ) -> std::result::Result<(), InitializationError> {
        for address in address_factory.bind_addresses() {
            match self.configuration.create_stream_server(address_factory.as_ref()) {
                None => info!("Configuration did not create a StreamServer for: {}", address),
                Some(mut server) => {
                    debug!("Init stream server on address: {}", address);
                    match server.init(address, Arc::clone(router)) {
                        Ok(()) => state.stream_servers.push((address, Arc::from(server))),
                        Err(e) if e.is_bind_conflict() => {
                            warn!("Failed to init StreamServer: {}", e);
                            warn!("Removing unusable address: {}", address);
                            state.unusable_addresses.push(address);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            match self.configuration.create_datagram_io(address_factory.as_ref()) {
                None => info!("Configuration did not create a DatagramIO for: {}", address),
                Some(mut datagram_io) => {
                    debug!("Init datagram I/O on address: {}", address);
                    datagram_io.init(
                        address,
                        address_factory.multicast_response_port(),
                        Arc::clone(router),
                        self.configuration.datagram_processor(),
                    )?;
                    state.datagram_ios.push((address, Arc::from(datagram_io)));
                }
            }
        }

        let executor = self.configuration.stream_server_executor();
        for (address, server) in &state.stream_servers {
            debug!("Starting stream server on address: {}", address);
            let server = Arc::clone(server);
            executor
                .execute(Box::new(move || server.run()))
                .map_err(|e| InitializationError::other("StreamServer", e.to_string()))?;
        }

        let executor = self.configuration.datagram_io_executor();
        for (address, datagram_io) in &state.datagram_ios {
            debug!("Starting datagram I/O on address: {}", address);
            let datagram_io = Arc::clone(datagram_io);
            executor
                .execute(Box::new(move || datagram_io.run()))
                .map_err(|e| InitializationError::other("DatagramIO", e.to_string()))?;
        }
        Ok(())
    }

    /// Stop every transport, logging failures so the rest still stop.
    fn stop_transports(state: &mut RouterState) {
        if let Some(client) = state.stream_client.take() {
            debug!("Stopping stream client connection management/pool");
            if let Err(e) = client.stop() {
                warn!("Failed to stop stream client: {}", e);
            }
        }

        for (address, server) in state.stream_servers.drain(..) {
            debug!("Stopping stream server on address: {}", address);
            if let Err(e) = server.stop() {
                warn!("Failed to stop stream server on {}: {}", address, e);
            }
        }

        for (interface, receiver) in state.multicast_receivers.drain(..) {
            debug!("Stopping multicast receiver on interface: {}", interface.name);
            if let Err(e) = receiver.stop() {
                warn!("Failed to stop multicast receiver on {}: {}", interface.name, e);
            }
        }

        for (address, datagram_io) in state.datagram_ios.drain(..) {
            debug!("Stopping datagram I/O on address: {}", address);
            if let Err(e) = datagram_io.stop() {
                warn!("Failed to stop datagram I/O on {}: {}", address, e);
            }
        }

        state.address_factory = None;
    }
}

impl Router for RouterImpl {
    fn configuration(&self) -> &Arc<dyn UpnpServiceConfiguration> {
        &self.configuration
    }

    fn protocol_factory(&self) -> &Arc<dyn ProtocolFactory> {
        &self.protocol_factory
    }

    fn enable(&self) -> Result<bool> {
        let mut state = self.write_lock()?;
        if state.enabled {
            return Ok(false);
        }

        debug!("Starting networking services...");
        match self.start(&mut state) {
            Ok(()) => {
                state.enabled = true;
                self.enabled.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                Self::stop_transports(&mut state);
                drop(state);
                self.handle_start_failure(e)?;
                Ok(false)
            }
        }
    }

    fn disable(&self) -> Result<bool> {
        let mut state = self.write_lock()?;
        if !state.enabled {
            return Ok(false);
        }

        debug!("Disabling network services...");
        self.enabled.store(false, Ordering::SeqCst);
        Self::stop_transports(&mut state);
        state.enabled = false;
        Ok(true)
    }

    fn shutdown(&self) -> Result<()> {
        self.disable().map(|_| ())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn active_stream_servers(&self, preferred: Option<IpAddr>) -> Result<Vec<NetworkAddress>> {
        let state = self.read_lock()?;
        if !state.enabled || state.stream_servers.is_empty() {
            return Ok(Vec::new());
        }
        let Some(address_factory) = state.address_factory.as_ref() else {
            return Ok(Vec::new());
        };

        let network_address = |address: IpAddr, server: &Arc<dyn StreamServer>| {
            let interface = address_factory.interface_name(address).unwrap_or_default();
            let network_address = NetworkAddress::new(interface, address, server.port());
            match address_factory.hardware_address(address) {
                Some(hardware_address) => network_address.with_hardware_address(hardware_address),
                None => network_address,
            }
        };

        if let Some(preferred) = preferred {
            if let Some((address, server)) = state.stream_servers.iter().find(|(a, _)| *a == preferred) {
                return Ok(vec![network_address(*address, server)]);
            }
        }

        Ok(state
            .stream_servers
            .iter()
            .map(|(address, server)| network_address(*address, server))
            .collect())
    }

    fn received_datagram(&self, message: IncomingDatagramMessage) {
        if !self.is_enabled() {
            debug!("Router disabled, ignoring incoming message from: {}", message.source_address);
            return;
        }

        let source = message.source_address;
        match self.protocol_factory.create_receiving_async(message) {
            Ok(None) => trace!("No protocol, ignoring received message from: {}", source),
            Ok(Some(protocol)) => {
                debug!("Received asynchronous message from: {}", source);
                if let Err(e) = self
                    .configuration
                    .async_protocol_executor()
                    .execute(Box::new(move || protocol.run()))
                {
                    warn!("Dropping datagram protocol from {}: {}", source, e);
                }
            }
            Err(e) => warn!("Handling received datagram failed - {}", e),
        }
    }

    fn received_stream(&self, stream: Box<dyn UpnpStream>) {
        if !self.is_enabled() {
            debug!("Router disabled, ignoring incoming stream");
            return;
        }

        debug!("Received synchronous stream");
        if let Err(e) = self
            .configuration
            .sync_protocol_executor()
            .execute(Box::new(move || stream.run()))
        {
            warn!("Dropping stream: {}", e);
        }
    }

    fn send_datagram(&self, message: &OutgoingDatagramMessage) -> Result<()> {
        let state = self.read_lock()?;
        if !state.enabled {
            debug!("Router disabled, not sending datagram to: {}", message.destination);
            return Ok(());
        }
        for (_, datagram_io) in &state.datagram_ios {
            datagram_io.send(message);
        }
        Ok(())
    }

    fn send_stream(&self, request: &StreamRequestMessage) -> Result<Option<StreamResponseMessage>> {
        let state = self.read_lock()?;
        if !state.enabled {
            debug!("Router disabled, not sending stream request: {}", request.uri);
            return Ok(None);
        }
        let Some(client) = state.stream_client.as_ref() else {
            debug!("No StreamClient available, not sending: {}", request.uri);
            return Ok(None);
        };

        debug!("Sending via TCP unicast stream: {} {}", request.method, request.uri);
        match client.send_request(request) {
            Ok(response) => Ok(response),
            Err(TransportError::Interrupted) => Err(RouterError::Interrupted(
                "Sending stream request was interrupted".to_string(),
            )),
            Err(e) => {
                warn!("Sending stream request to {} failed: {}", request.uri, e);
                Ok(None)
            }
        }
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<()> {
        let state = self.read_lock()?;
        if !state.enabled {
            debug!("Router disabled, not broadcasting");
            return Ok(());
        }
        let Some(address_factory) = state.address_factory.as_ref() else {
            return Ok(());
        };
        for (address, datagram_io) in &state.datagram_ios {
            if let Some(broadcast) = address_factory.broadcast_address(*address) {
                debug!("Sending UDP datagram to broadcast address: {}", broadcast);
                datagram_io.send_packet(bytes, SocketAddr::new(IpAddr::V4(broadcast), BROADCAST_PORT));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RouterImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterImpl")
            .field("enabled", &self.is_enabled())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}
