//! Local network interfaces and the addresses transports bind to.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, warn};

use crate::error::InitializationError;
use crate::spi::NetworkAddressFactory;

/// Environment variable restricting interfaces by name, comma separated.
pub const USE_INTERFACES_ENV: &str = "UPNP_NETWORK_USE_INTERFACES";

/// Environment variable restricting bind addresses, comma separated.
pub const USE_ADDRESSES_ENV: &str = "UPNP_NETWORK_USE_ADDRESSES";

/// One address of an interface with its network prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub prefix_length: u8,
}

impl InterfaceAddress {
    pub fn new(address: IpAddr, prefix_length: u8) -> Self {
        Self {
            address,
            prefix_length,
        }
    }

    /// Subnet broadcast address, IPv4 only.
    pub fn broadcast(&self) -> Option<Ipv4Addr> {
        match self.address {
            IpAddr::V4(v4) if self.prefix_length <= 32 => {
                let host_bits = 32 - u32::from(self.prefix_length);
                let mask = if host_bits == 32 { 0 } else { u32::MAX << host_bits };
                Some(Ipv4Addr::from(u32::from(v4) | !mask))
            }
            _ => None,
        }
    }

    /// Whether `other` lies in this address's subnet.
    pub fn contains(&self, other: IpAddr) -> bool {
        match (self.address, other) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let host_bits = 32 - u32::from(self.prefix_length.min(32));
                if host_bits == 32 {
                    return true;
                }
                let mask = u32::MAX << host_bits;
                u32::from(a) & mask == u32::from(b) & mask
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let host_bits = 128 - u32::from(self.prefix_length.min(128));
                if host_bits == 128 {
                    return true;
                }
                let mask = u128::MAX << host_bits;
                u128::from(a) & mask == u128::from(b) & mask
            }
            _ => false,
        }
    }
}

/// A local network interface usable by the stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkInterface {
    pub name: String,
    pub addresses: Vec<InterfaceAddress>,
    pub hardware_address: Option<Vec<u8>>,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
            hardware_address: None,
        }
    }

    pub fn with_address(mut self, address: IpAddr, prefix_length: u8) -> Self {
        self.addresses.push(InterfaceAddress::new(address, prefix_length));
        self
    }

    pub fn with_hardware_address(mut self, hardware_address: Vec<u8>) -> Self {
        self.hardware_address = Some(hardware_address);
        self
    }

    /// First IPv4 address, used to join multicast groups.
    pub fn ipv4_address(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|a| match a.address {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
    }
}

fn is_usable_address(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_multicast(),
        IpAddr::V6(v6) => !v6.is_unspecified() && !v6.is_multicast(),
    }
}

/// Address factory over a fixed set of interfaces.
///
/// Interfaces are given explicitly or detected with [`detect`]. Filters
/// from [`USE_INTERFACES_ENV`] and [`USE_ADDRESSES_ENV`] restrict what is
/// used.
///
/// [`detect`]: StaticNetworkAddressFactory::detect
#[derive(Debug, Clone)]
pub struct StaticNetworkAddressFactory {
    interfaces: Vec<NetworkInterface>,
    multicast_group: Ipv4Addr,
    multicast_port: u16,
    stream_listen_port: u16,
    multicast_response_port: u16,
}

impl StaticNetworkAddressFactory {
    pub fn new(interfaces: Vec<NetworkInterface>) -> Self {
        Self {
            interfaces,
            multicast_group: crate::config::DEFAULT_MULTICAST_GROUP,
            multicast_port: crate::config::DEFAULT_MULTICAST_PORT,
            stream_listen_port: 0,
            multicast_response_port: 0,
        }
    }

    /// Single interface holding the address used for outbound traffic.
    ///
    /// The address is found by connecting a UDP socket; nothing is sent.
    pub fn detect() -> Result<Self, InitializationError> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| InitializationError::NoNetwork(format!("Failed to bind detection socket: {}", e)))?;
        socket
            .connect("8.8.8.8:80")
            .map_err(|e| InitializationError::NoNetwork(format!("No route to detect local address: {}", e)))?;
        let address = socket
            .local_addr()
            .map_err(|e| InitializationError::NoNetwork(e.to_string()))?
            .ip();
        debug!("Detected local address {}", address);
        Ok(Self::new(vec![NetworkInterface::new("default").with_address(address, 24)]))
    }

    /// Apply interface and address filters from the environment.
    pub fn from_env(self) -> Self {
        let interfaces = std::env::var(USE_INTERFACES_ENV).ok();
        let addresses = std::env::var(USE_ADDRESSES_ENV).ok();
        self.filtered(interfaces.as_deref(), addresses.as_deref())
    }

    /// Keep only interfaces and addresses named in the comma separated lists.
    pub fn filtered(mut self, interfaces: Option<&str>, addresses: Option<&str>) -> Self {
        if let Some(names) = interfaces.map(split_list).filter(|l| !l.is_empty()) {
            self.interfaces.retain(|i| names.iter().any(|n| n == &i.name));
        }
        if let Some(allowed) = addresses.map(split_list).filter(|l| !l.is_empty()) {
            let allowed: Vec<IpAddr> = allowed
                .iter()
                .filter_map(|a| match a.parse() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        warn!("Ignoring invalid address filter '{}'", a);
                        None
                    }
                })
                .collect();
            for interface in &mut self.interfaces {
                interface.addresses.retain(|a| allowed.contains(&a.address));
            }
        }
        self.interfaces.retain(|i| !i.addresses.is_empty());
        self
    }

    pub fn with_ports(mut self, stream_listen_port: u16, multicast_response_port: u16) -> Self {
        self.stream_listen_port = stream_listen_port;
        self.multicast_response_port = multicast_response_port;
        self
    }

    pub fn with_multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.multicast_group = group;
        self.multicast_port = port;
        self
    }

    fn interface_address(&self, address: IpAddr) -> Option<(&NetworkInterface, &InterfaceAddress)> {
        self.interfaces.iter().find_map(|i| {
            i.addresses
                .iter()
                .find(|a| a.address == address)
                .map(|a| (i, a))
        })
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl NetworkAddressFactory for StaticNetworkAddressFactory {
    fn multicast_group(&self) -> Ipv4Addr {
        self.multicast_group
    }

    fn multicast_port(&self) -> u16 {
        self.multicast_port
    }

    fn stream_listen_port(&self) -> u16 {
        self.stream_listen_port
    }

    fn multicast_response_port(&self) -> u16 {
        self.multicast_response_port
    }

    fn network_interfaces(&self) -> Vec<NetworkInterface> {
        self.interfaces.clone()
    }

    fn bind_addresses(&self) -> Vec<IpAddr> {
        self.interfaces
            .iter()
            .flat_map(|i| i.addresses.iter().map(|a| a.address))
            .filter(|a| is_usable_address(*a))
            .collect()
    }

    fn has_usable_network(&self) -> bool {
        !self.interfaces.is_empty() && !self.bind_addresses().is_empty()
    }

    fn broadcast_address(&self, address: IpAddr) -> Option<Ipv4Addr> {
        self.interface_address(address).and_then(|(_, a)| a.broadcast())
    }

    fn network_prefix_length(&self, address: IpAddr) -> Option<u8> {
        self.interface_address(address).map(|(_, a)| a.prefix_length)
    }

    fn local_address(&self, interface: &NetworkInterface, ipv6: bool, remote: IpAddr) -> Option<IpAddr> {
        let in_subnet = self
            .interfaces
            .iter()
            .flat_map(|i| i.addresses.iter())
            .find(|a| a.contains(remote))
            .map(|a| a.address);
        if in_subnet.is_some() {
            return in_subnet;
        }
        interface
            .addresses
            .iter()
            .map(|a| a.address)
            .find(|a| a.is_ipv6() == ipv6 && is_usable_address(*a))
    }

    fn interface_name(&self, address: IpAddr) -> Option<String> {
        self.interface_address(address).map(|(i, _)| i.name.clone())
    }

    fn hardware_address(&self, address: IpAddr) -> Option<Vec<u8>> {
        self.interface_address(address)
            .and_then(|(i, _)| i.hardware_address.clone())
    }
}
