//! Error types for the GENA subscription engine.

use thiserror::Error;
use upnp_model::ExecutionError;

use crate::subscription::SubscriptionPhase;

#[derive(Debug, Error)]
pub enum GenaError {
    /// The evented state of the service could not be read when the
    /// subscription was created.
    #[error("Failed to read initial evented state: {0}")]
    InitialState(#[source] ExecutionError),

    #[error("Invalid subscription transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SubscriptionPhase,
        to: SubscriptionPhase,
    },

    #[error("Invalid callback URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Convenience Result type alias for subscription operations.
pub type Result<T> = std::result::Result<T, GenaError>;
