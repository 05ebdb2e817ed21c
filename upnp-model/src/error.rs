//! Error types for the UPnP model layer.
//!
//! Value validation failures, UPnP action faults and the classification of
//! failures raised while a service implementation runs.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// A value does not satisfy the datatype or constraints of a state variable
/// or action argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid value: {message}")]
pub struct InvalidValueError {
    message: String,
}

impl InvalidValueError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Standard UPnP control error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidAction,
    InvalidArgs,
    ActionFailed,
    ArgumentValueInvalid,
    ArgumentValueOutOfRange,
    OptionalActionNotImplemented,
    OutOfMemory,
    HumanInterventionRequired,
    StringArgumentTooLong,
}

impl ErrorCode {
    /// Numeric code transmitted in a UPnP fault.
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::InvalidAction => 401,
            ErrorCode::InvalidArgs => 402,
            ErrorCode::ActionFailed => 501,
            ErrorCode::ArgumentValueInvalid => 600,
            ErrorCode::ArgumentValueOutOfRange => 601,
            ErrorCode::OptionalActionNotImplemented => 602,
            ErrorCode::OutOfMemory => 603,
            ErrorCode::HumanInterventionRequired => 604,
            ErrorCode::StringArgumentTooLong => 605,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAction => "No action by that name at this service",
            ErrorCode::InvalidArgs => "Not enough IN arguments, too many IN arguments, no IN argument by that name, or one or more IN arguments are of the wrong data type",
            ErrorCode::ActionFailed => "Current state of service prevents invoking that action",
            ErrorCode::ArgumentValueInvalid => "The argument value is invalid",
            ErrorCode::ArgumentValueOutOfRange => "An argument value is less than the minimum or more than the maximum value of the allowed value range, or is not in the allowed value list",
            ErrorCode::OptionalActionNotImplemented => "The requested action is optional and is not implemented by the device",
            ErrorCode::OutOfMemory => "The device does not have sufficient memory available to complete the action",
            ErrorCode::HumanInterventionRequired => "The device has encountered an error condition which it cannot resolve itself and required human intervention such as a reset or power cycle",
            ErrorCode::StringArgumentTooLong => "A string argument is too long for the device to handle properly",
        }
    }

    /// Looks up a standard error code by its numeric value.
    pub fn from_code(code: u32) -> Option<ErrorCode> {
        [
            ErrorCode::InvalidAction,
            ErrorCode::InvalidArgs,
            ErrorCode::ActionFailed,
            ErrorCode::ArgumentValueInvalid,
            ErrorCode::ArgumentValueOutOfRange,
            ErrorCode::OptionalActionNotImplemented,
            ErrorCode::OutOfMemory,
            ErrorCode::HumanInterventionRequired,
            ErrorCode::StringArgumentTooLong,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// A UPnP action fault: numeric error code plus message.
///
/// This is the only failure that is reported back to the invoking control
/// point. Everything else raised by a service implementation is classified
/// into one of these before it leaves the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (error code {error_code})")]
pub struct ActionException {
    error_code: u32,
    message: String,
    cause: Option<String>,
}

impl ActionException {
    pub fn new(error_code: u32, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            cause: None,
        }
    }

    /// Fault carrying only the standard description of `code`.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code.code(), code.description())
    }

    /// Fault whose message is the standard description followed by `message`.
    pub fn with_message(code: ErrorCode, message: impl AsRef<str>) -> Self {
        Self::new(
            code.code(),
            format!("{}. {}.", code.description(), message.as_ref()),
        )
    }

    /// Fault whose message is `message` verbatim.
    pub fn with_plain_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.code(), message)
    }

    /// Attach the text of the underlying failure.
    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Fault recorded when an invocation is interrupted before it completes.
    pub fn cancelled() -> Self {
        Self::new(
            ErrorCode::ActionFailed.code(),
            "Action execution was cancelled",
        )
        .caused_by("interrupted")
    }

    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Whether this fault was produced by interruption of the invocation.
    pub fn is_cancelled(&self) -> bool {
        self.error_code == ErrorCode::ActionFailed.code()
            && self.message == "Action execution was cancelled"
    }
}

impl From<InvalidValueError> for ActionException {
    fn from(err: InvalidValueError) -> Self {
        ActionException::with_message(ErrorCode::ArgumentValueInvalid, err.message())
    }
}

/// Failure raised while a service implementation executes a command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A deliberate UPnP fault.
    #[error(transparent)]
    Action(#[from] ActionException),

    /// The executing thread was interrupted.
    #[error("Execution was interrupted")]
    Interrupted,

    /// The service lock could not be acquired in time.
    #[error("Failed to acquire lock in {0} ms")]
    LockTimeout(u64),

    /// Any other failure of the implementation.
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl ExecutionError {
    pub fn other<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ExecutionError::Other(Box::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        ExecutionError::Other(message.into())
    }

    /// Message of the innermost error in the source chain.
    pub fn root_cause_message(&self) -> String {
        let mut current: &(dyn StdError + 'static) = match self {
            ExecutionError::Other(inner) => inner.as_ref(),
            other => return other.to_string(),
        };
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}

impl From<InvalidValueError> for ExecutionError {
    fn from(err: InvalidValueError) -> Self {
        ExecutionError::Action(err.into())
    }
}

/// An incoming message could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported data: {message}")]
pub struct UnsupportedDataError {
    message: String,
    data: Option<String>,
}

impl UnsupportedDataError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Some(data.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The offending payload, if it was captured.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }
}

/// Service metadata is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Action '{action}' argument '{argument}' references unknown state variable '{variable}'")]
    UnknownStateVariable {
        action: String,
        argument: String,
        variable: String,
    },

    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("Invalid service metadata: {0}")]
    Invalid(String),
}

/// Convenience Result type alias for metadata construction.
pub type Result<T> = std::result::Result<T, ModelError>;
