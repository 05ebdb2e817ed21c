//! Core model types shared by the upnp-sdk crates.
//!
//! This crate holds everything the router, the GENA engine and the action
//! executors exchange:
//!
//! - [`types`]: built-in datatypes, typed values and `ui4` sequence numbers
//! - [`meta`]: state variables, actions and local/remote service metadata
//! - [`action`]: validated argument values and action invocations
//! - [`manager`]: serialized access to service implementations and
//!   evented state publication
//! - [`message`]: datagram and stream message carriers
//! - [`namespace`], [`network`], [`expiration`], [`clock`]: supporting types

pub mod action;
pub mod clock;
pub mod error;
pub mod expiration;
pub mod manager;
pub mod message;
pub mod meta;
pub mod namespace;
pub mod network;
pub mod state;
pub mod types;

pub use action::{ActionArgumentValue, ActionInvocation, RemoteClientInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ActionException, ErrorCode, ExecutionError, InvalidValueError, ModelError,
    UnsupportedDataError,
};
pub use expiration::ExpirationDetails;
pub use manager::{
    ChangeNotifier, DefaultServiceManager, ListenerId, PropertyChangeListener, ServiceManager,
    StateEventSource,
};
pub use message::{
    IncomingDatagramMessage, OutgoingDatagramMessage, StreamConnection, StreamRequestMessage,
    StreamResponseMessage, UpnpHeaders, UpnpOperation, UpnpRequest, UpnpRequestMethod,
    UpnpResponse,
};
pub use meta::{
    Action, ActionArgument, AllowedValueRange, Direction, LocalService, RemoteService, Service,
    ServiceId, ServiceType, StateVariable, StateVariableEventDetails, StateVariableTypeDetails,
    Udn,
};
pub use namespace::Namespace;
pub use network::NetworkAddress;
pub use state::{StateVariableAccessor, StateVariableValue};
pub use types::{Datatype, UnsignedIntegerFourBytes, Value};
