//! Configuration for the router and its default transports.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::InitializationError;

/// SSDP multicast group.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP multicast port.
pub const DEFAULT_MULTICAST_PORT: u16 = 1900;

/// Settings shared by the router, the executors and the default transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time to wait for the router lock
    /// Default: 6 seconds
    pub lock_timeout: Duration,

    /// Multicast group joined by multicast receivers
    /// Default: 239.255.255.250
    pub multicast_group: Ipv4Addr,

    /// Port multicast receivers listen on
    /// Default: 1900
    pub multicast_port: u16,

    /// Local port of datagram sockets, 0 picks an ephemeral port
    /// Default: 0
    pub multicast_response_port: u16,

    /// Port stream servers listen on, 0 picks an ephemeral port
    /// Default: 0
    pub stream_listen_port: u16,

    /// Receive buffer size for a single datagram
    /// Default: 640
    pub max_datagram_bytes: usize,

    /// Time-to-live of outgoing multicast datagrams
    /// Default: 4
    pub multicast_ttl: u32,

    /// Worker threads processing stream requests
    /// Default: 16
    pub sync_protocol_threads: usize,

    /// Worker threads processing received datagrams
    /// Default: 8
    pub async_protocol_threads: usize,

    /// Pending tasks per protocol pool before submissions are rejected
    /// Default: 1000
    pub protocol_queue_capacity: usize,

    /// Timeout of outgoing stream requests
    /// Default: 10 seconds
    pub stream_client_timeout: Duration,

    /// Time an inbound stream request waits for its protocol's response
    /// Default: 30 seconds
    pub stream_server_response_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(6),
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_response_port: 0,
            stream_listen_port: 0,
            max_datagram_bytes: 640,
            multicast_ttl: 4,
            sync_protocol_threads: 16,
            async_protocol_threads: 8,
            protocol_queue_capacity: 1000,
            stream_client_timeout: Duration::from_secs(10),
            stream_server_response_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small pools and short timeouts for embedded hosts.
    pub fn resource_efficient() -> Self {
        Self {
            sync_protocol_threads: 4,
            async_protocol_threads: 2,
            protocol_queue_capacity: 100,
            ..Default::default()
        }
    }

    /// Short timeouts suited for tests against local transports.
    pub fn fast_local() -> Self {
        Self {
            lock_timeout: Duration::from_secs(1),
            stream_client_timeout: Duration::from_secs(2),
            stream_server_response_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), InitializationError> {
        if self.lock_timeout == Duration::ZERO {
            return Err(InitializationError::other(
                "TransportConfig",
                "Lock timeout must be greater than 0",
            ));
        }

        if !self.multicast_group.is_multicast() {
            return Err(InitializationError::other(
                "TransportConfig",
                format!("{} is not a multicast address", self.multicast_group),
            ));
        }

        if self.max_datagram_bytes == 0 {
            return Err(InitializationError::other(
                "TransportConfig",
                "Max datagram bytes must be greater than 0",
            ));
        }

        if self.sync_protocol_threads == 0 || self.async_protocol_threads == 0 {
            return Err(InitializationError::other(
                "TransportConfig",
                "Protocol pools need at least one thread",
            ));
        }

        if self.protocol_queue_capacity == 0 {
            return Err(InitializationError::other(
                "TransportConfig",
                "Protocol queue capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_stream_listen_port(mut self, port: u16) -> Self {
        self.stream_listen_port = port;
        self
    }

    pub fn with_multicast_response_port(mut self, port: u16) -> Self {
        self.multicast_response_port = port;
        self
    }

    pub fn with_multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.multicast_group = group;
        self.multicast_port = port;
        self
    }

    pub fn with_protocol_threads(mut self, sync: usize, r#async: usize) -> Self {
        self.sync_protocol_threads = sync;
        self.async_protocol_threads = r#async;
        self
    }

    pub fn with_stream_client_timeout(mut self, timeout: Duration) -> Self {
        self.stream_client_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(6));
        assert_eq!(config.multicast_group, Ipv4Addr::new(239, 255, 255, 250));
        assert_eq!(config.multicast_port, 1900);
        assert_eq!(config.max_datagram_bytes, 640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let not_multicast = TransportConfig::new().with_multicast(Ipv4Addr::new(10, 0, 0, 1), 1900);
        assert!(not_multicast.validate().is_err());

        let no_threads = TransportConfig::new().with_protocol_threads(0, 2);
        assert!(no_threads.validate().is_err());

        let no_timeout = TransportConfig::new().with_lock_timeout(Duration::ZERO);
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_config_presets() {
        let efficient = TransportConfig::resource_efficient();
        assert_eq!(efficient.sync_protocol_threads, 4);
        assert!(efficient.validate().is_ok());

        let fast = TransportConfig::fast_local();
        assert_eq!(fast.lock_timeout, Duration::from_secs(1));
        assert!(fast.validate().is_ok());
    }
}
