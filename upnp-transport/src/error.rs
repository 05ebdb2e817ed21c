//! Error types for the upnp-transport crate.

use std::io;

use thiserror::Error;

/// Errors surfaced by router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The router lock could not be acquired in time
    #[error("Router wasn't available exclusively after waiting {0}ms, lock failed")]
    LockTimeout(u64),

    /// A blocking operation was interrupted
    #[error("{0}")]
    Interrupted(String),

    /// No usable network interface or address survived initialization
    #[error("No usable network: {0}")]
    NoNetwork(String),

    /// A transport could not be initialized
    #[error("Router initialization failed: {0}")]
    Initialization(#[from] InitializationError),
}

/// Errors raised while a transport or the address factory is initialized.
#[derive(Debug, Error)]
pub enum InitializationError {
    /// The local address or port is already in use
    #[error("Could not bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// No usable interface or address is available
    #[error("{0}")]
    NoNetwork(String),

    /// Any other setup failure
    #[error("Could not initialize {component}: {message}")]
    Other { component: &'static str, message: String },
}

impl InitializationError {
    pub fn other(component: &'static str, message: impl Into<String>) -> Self {
        InitializationError::Other {
            component,
            message: message.into(),
        }
    }

    /// Classify an I/O failure from binding a socket.
    pub fn from_bind(component: &'static str, address: impl Into<String>, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => InitializationError::Bind {
                address: address.into(),
                source,
            },
            _ => InitializationError::other(component, source.to_string()),
        }
    }

    pub fn is_bind_conflict(&self) -> bool {
        matches!(self, InitializationError::Bind { .. })
    }
}

/// Errors raised by transports while sending, receiving or stopping.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request was interrupted")]
    Interrupted,

    #[error("Executor rejected task: {0}")]
    Rejected(String),

    #[error("Unsupported data: {0}")]
    UnsupportedData(#[from] upnp_model::UnsupportedDataError),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

/// A protocol could not be created for a received message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not create protocol: {0}")]
pub struct ProtocolCreationError(pub String);

pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(io::ErrorKind::AddrInUse, true)]
    #[case(io::ErrorKind::AddrNotAvailable, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn test_bind_classification(#[case] kind: io::ErrorKind, #[case] conflict: bool) {
        let err = InitializationError::from_bind("StreamServer", "127.0.0.1:0", io::Error::from(kind));
        assert_eq!(err.is_bind_conflict(), conflict);
    }

    #[test]
    fn test_lock_timeout_message() {
        assert_eq!(
            RouterError::LockTimeout(6000).to_string(),
            "Router wasn't available exclusively after waiting 6000ms, lock failed"
        );
    }
}
