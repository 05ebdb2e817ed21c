//! Network router and default transports for upnp-sdk.
//!
//! The [`RouterImpl`] owns every socket of the stack. It is built from a
//! [`UpnpServiceConfiguration`], which creates the transports, and a
//! [`ProtocolFactory`], which turns received messages into protocols:
//!
//! ```no_run
//! use std::sync::Arc;
//! use upnp_transport::{
//!     DefaultUpnpServiceConfiguration, ProtocolFactory, Router, RouterImpl, TransportConfig,
//! };
//!
//! # fn protocols() -> Arc<dyn ProtocolFactory> { unimplemented!() }
//! let configuration = DefaultUpnpServiceConfiguration::new(TransportConfig::default())?;
//! let router = RouterImpl::new(Arc::new(configuration), protocols());
//! if router.enable()? {
//!     println!("Serving on {:?}", router.active_stream_servers(None)?);
//! }
//! router.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod configuration;
pub mod datagram;
pub mod error;
pub mod executor;
pub mod network;
pub mod router;
pub mod spi;
pub mod stream;
pub mod transport;

pub use config::{TransportConfig, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT};
pub use configuration::{DefaultUpnpServiceConfiguration, UpnpServiceConfiguration};
pub use datagram::DefaultDatagramProcessor;
pub use error::{InitializationError, ProtocolCreationError, Result, RouterError, TransportError};
pub use executor::{BoundedThreadPool, DedicatedThreadExecutor, Executor, Task};
pub use network::{InterfaceAddress, NetworkInterface, StaticNetworkAddressFactory};
pub use router::{Router, RouterBuilder, RouterImpl, BROADCAST_PORT};
pub use spi::{
    DatagramIo, DatagramProcessor, MulticastReceiver, NetworkAddressFactory, ProtocolFactory,
    ReceivingAsync, ReceivingSync, StreamClient, StreamServer, UpnpStream,
};
pub use stream::{process_stream_request, StreamProcessor};
pub use transport::{DatagramIoImpl, MulticastReceiverImpl, ReqwestStreamClient, WarpStreamServer};
