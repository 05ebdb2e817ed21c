//! # upnp-sdk
//!
//! Core of a UPnP device and control point stack, assembled from:
//!
//! - [`transport`]: the network router owning every socket, and the default
//!   UDP and HTTP transports
//! - [`gena`]: GENA subscription state machines for hosted and remote
//!   services
//! - [`control`]: action execution against hosted service implementations
//! - [`model`]: datatypes, service metadata, messages and service managers
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use upnp_sdk::logging::{init_logging_from_env};
//! use upnp_sdk::transport::{DefaultUpnpServiceConfiguration, ProtocolFactory, Router, RouterImpl, TransportConfig};
//!
//! # fn protocols() -> Arc<dyn ProtocolFactory> { unimplemented!() }
//! fn main() -> upnp_sdk::Result<()> {
//!     init_logging_from_env()?;
//!
//!     let configuration = DefaultUpnpServiceConfiguration::new(TransportConfig::default())?;
//!     let router = RouterImpl::new(Arc::new(configuration), protocols());
//!     router.enable()?;
//!     for address in router.active_stream_servers(None)? {
//!         println!("Listening on {}", address.socket_addr());
//!     }
//!     router.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{Result, SdkError};

pub use upnp_control as control;
pub use upnp_gena as gena;
pub use upnp_model as model;
pub use upnp_transport as transport;

pub use upnp_control::{ActionExecutor, MethodActionExecutor, QueryStateVariableExecutor};
pub use upnp_gena::{LocalGenaSubscription, RemoteGenaSubscription, SubscriptionPhase};
pub use upnp_model::{ActionInvocation, DefaultServiceManager, LocalService, RemoteService};
pub use upnp_transport::{Router, RouterImpl, TransportConfig};
