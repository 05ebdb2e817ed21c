//! Umbrella error for applications using several parts of the stack.

use thiserror::Error;

use crate::logging::LoggingError;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Router error: {0}")]
    Router(#[from] upnp_transport::RouterError),

    #[error("Transport initialization failed: {0}")]
    Initialization(#[from] upnp_transport::InitializationError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] upnp_gena::GenaError),

    #[error("Invalid service metadata: {0}")]
    Model(#[from] upnp_model::ModelError),

    #[error("Invalid value: {0}")]
    InvalidValue(#[from] upnp_model::InvalidValueError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

pub type Result<T> = std::result::Result<T, SdkError>;
