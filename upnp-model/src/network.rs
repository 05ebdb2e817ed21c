use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A reachable local endpoint: interface, address, port and optional
/// hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    interface_name: String,
    address: IpAddr,
    port: u16,
    hardware_address: Option<Vec<u8>>,
}

impl NetworkAddress {
    pub fn new(interface_name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            interface_name: interface_name.into(),
            address,
            port,
            hardware_address: None,
        }
    }

    pub fn with_hardware_address(mut self, hardware_address: Vec<u8>) -> Self {
        self.hardware_address = Some(hardware_address);
        self
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn hardware_address(&self) -> Option<&[u8]> {
        self.hardware_address.as_deref()
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.socket_addr(), self.interface_name)
    }
}
