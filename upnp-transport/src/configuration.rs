//! Factory for the transports and executors a router uses.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::TransportConfig;
use crate::datagram::DefaultDatagramProcessor;
use crate::error::InitializationError;
use crate::executor::{BoundedThreadPool, DedicatedThreadExecutor, Executor};
use crate::network::{NetworkInterface, StaticNetworkAddressFactory};
use crate::spi::{
    DatagramIo, DatagramProcessor, MulticastReceiver, NetworkAddressFactory, StreamClient,
    StreamServer,
};
use crate::transport::{DatagramIoImpl, MulticastReceiverImpl, ReqwestStreamClient, WarpStreamServer};

/// Creates the transports of a router and the executors they run on.
///
/// Factory methods returning `None` disable that transport kind.
pub trait UpnpServiceConfiguration: Send + Sync {
    fn create_network_address_factory(&self) -> Result<Arc<dyn NetworkAddressFactory>, InitializationError>;

    fn create_multicast_receiver(
        &self,
        address_factory: &dyn NetworkAddressFactory,
    ) -> Option<Box<dyn MulticastReceiver>>;

    fn create_datagram_io(&self, address_factory: &dyn NetworkAddressFactory) -> Option<Box<dyn DatagramIo>>;

    fn create_stream_server(&self, address_factory: &dyn NetworkAddressFactory) -> Option<Box<dyn StreamServer>>;

    fn create_stream_client(&self) -> Result<Box<dyn StreamClient>, InitializationError>;

    fn datagram_processor(&self) -> Arc<dyn DatagramProcessor>;

    fn multicast_receiver_executor(&self) -> Arc<dyn Executor>;

    fn datagram_io_executor(&self) -> Arc<dyn Executor>;

    fn stream_server_executor(&self) -> Arc<dyn Executor>;

    fn sync_protocol_executor(&self) -> Arc<dyn Executor>;

    fn async_protocol_executor(&self) -> Arc<dyn Executor>;

    fn router_lock_timeout(&self) -> Duration {
        Duration::from_secs(6)
    }

    /// Release executors. Called once the router is shut down.
    fn shutdown(&self) {}
}

/// Configuration wiring the default transports.
pub struct DefaultUpnpServiceConfiguration {
    config: TransportConfig,
    interfaces: Option<Vec<NetworkInterface>>,
    datagram_processor: Arc<dyn DatagramProcessor>,
    loop_executor: Arc<DedicatedThreadExecutor>,
    sync_protocol_pool: Arc<BoundedThreadPool>,
    async_protocol_pool: Arc<BoundedThreadPool>,
}

impl DefaultUpnpServiceConfiguration {
    pub fn new(config: TransportConfig) -> Result<Self, InitializationError> {
        config.validate()?;
        let sync_protocol_pool = BoundedThreadPool::new(
            "upnp-sync-protocol",
            config.sync_protocol_threads,
            config.protocol_queue_capacity,
        )
        .map_err(|e| InitializationError::other("ProtocolExecutor", e.to_string()))?;
        let async_protocol_pool = BoundedThreadPool::new(
            "upnp-async-protocol",
            config.async_protocol_threads,
            config.protocol_queue_capacity,
        )
        .map_err(|e| InitializationError::other("ProtocolExecutor", e.to_string()))?;

        Ok(Self {
            config,
            interfaces: None,
            datagram_processor: Arc::new(DefaultDatagramProcessor),
            loop_executor: Arc::new(DedicatedThreadExecutor::new("upnp-transport")),
            sync_protocol_pool: Arc::new(sync_protocol_pool),
            async_protocol_pool: Arc::new(async_protocol_pool),
        })
    }

    /// Use these interfaces instead of detecting one.
    pub fn with_interfaces(mut self, interfaces: Vec<NetworkInterface>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    pub fn with_datagram_processor(mut self, processor: Arc<dyn DatagramProcessor>) -> Self {
        self.datagram_processor = processor;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl UpnpServiceConfiguration for DefaultUpnpServiceConfiguration {
    fn create_network_address_factory(&self) -> Result<Arc<dyn NetworkAddressFactory>, InitializationError> {
        let factory = match &self.interfaces {
            Some(interfaces) => StaticNetworkAddressFactory::new(interfaces.clone()),
            None => StaticNetworkAddressFactory::detect()?,
        };
        let factory = factory
            .from_env()
            .with_multicast(self.config.multicast_group, self.config.multicast_port)
            .with_ports(self.config.stream_listen_port, self.config.multicast_response_port);
        debug!("Using network interfaces: {:?}", factory.network_interfaces());
        Ok(Arc::new(factory))
    }

    fn create_multicast_receiver(
        &self,
        _address_factory: &dyn NetworkAddressFactory,
    ) -> Option<Box<dyn MulticastReceiver>> {
        Some(Box::new(MulticastReceiverImpl::new(self.config.max_datagram_bytes)))
    }

    fn create_datagram_io(&self, _address_factory: &dyn NetworkAddressFactory) -> Option<Box<dyn DatagramIo>> {
        Some(Box::new(DatagramIoImpl::new(
            self.config.max_datagram_bytes,
            self.config.multicast_ttl,
        )))
    }

    fn create_stream_server(&self, address_factory: &dyn NetworkAddressFactory) -> Option<Box<dyn StreamServer>> {
        Some(Box::new(WarpStreamServer::new(
            address_factory.stream_listen_port(),
            self.config.stream_server_response_timeout,
        )))
    }

    fn create_stream_client(&self) -> Result<Box<dyn StreamClient>, InitializationError> {
        Ok(Box::new(ReqwestStreamClient::new(self.config.stream_client_timeout)?))
    }

    fn datagram_processor(&self) -> Arc<dyn DatagramProcessor> {
        Arc::clone(&self.datagram_processor)
    }

    fn multicast_receiver_executor(&self) -> Arc<dyn Executor> {
        self.loop_executor.clone()
    }

    fn datagram_io_executor(&self) -> Arc<dyn Executor> {
        self.loop_executor.clone()
    }

    fn stream_server_executor(&self) -> Arc<dyn Executor> {
        self.loop_executor.clone()
    }

    fn sync_protocol_executor(&self) -> Arc<dyn Executor> {
        self.sync_protocol_pool.clone()
    }

    fn async_protocol_executor(&self) -> Arc<dyn Executor> {
        self.async_protocol_pool.clone()
    }

    fn router_lock_timeout(&self) -> Duration {
        self.config.lock_timeout
    }

    fn shutdown(&self) {
        debug!("Shutting down protocol executors");
        self.sync_protocol_pool.shutdown();
        self.async_protocol_pool.shutdown();
    }
}

impl std::fmt::Debug for DefaultUpnpServiceConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultUpnpServiceConfiguration")
            .field("config", &self.config)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Vec<NetworkInterface> {
        vec![NetworkInterface::new("lo").with_address("127.0.0.1".parse().unwrap(), 8)]
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TransportConfig::default().with_protocol_threads(0, 1);
        assert!(DefaultUpnpServiceConfiguration::new(config).is_err());
    }

    #[test]
    fn test_address_factory_from_explicit_interfaces() {
        let configuration = DefaultUpnpServiceConfiguration::new(
            TransportConfig::default().with_stream_listen_port(8099),
        )
        .unwrap()
        .with_interfaces(loopback());
        let factory = configuration.create_network_address_factory().unwrap();
        assert_eq!(factory.stream_listen_port(), 8099);
        assert_eq!(factory.multicast_port(), 1900);
        assert_eq!(configuration.router_lock_timeout(), Duration::from_secs(6));
        configuration.shutdown();
    }
}
