//! GENA subscription engine for upnp-sdk.
//!
//! - [`LocalGenaSubscription`]: a remote control point subscribed to a hosted
//!   service. Reads the evented state on creation, listens for changes,
//!   moderates them per state variable and hands surviving values to a
//!   [`LocalSubscriptionHandler`].
//! - [`RemoteGenaSubscription`]: this stack subscribed to a discovered
//!   service. Orders incoming events by sequence number, detects lost
//!   events and merges values before notifying a
//!   [`RemoteSubscriptionCallback`].
//!
//! Both share [`GenaSubscription`], which holds the subscription id,
//! durations, sequence, current values and [`SubscriptionPhase`].

pub mod error;
pub mod local;
pub mod remote;
pub mod subscription;

pub use error::{GenaError, Result};
pub use local::{
    LocalGenaSubscription, LocalGenaSubscriptionBuilder, LocalSubscriptionHandler,
    LocalSubscriptionState,
};
pub use remote::{RemoteGenaSubscription, RemoteSubscriptionCallback};
pub use subscription::{
    CancelReason, GenaSubscription, SubscriptionPhase, DEFAULT_SUBSCRIPTION_DURATION_SECONDS,
};
