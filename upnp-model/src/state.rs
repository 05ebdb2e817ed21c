//! Current values of state variables and how they are read from a service
//! implementation.

use std::fmt;
use std::sync::Arc;

use crate::error::ExecutionError;
use crate::types::Value;

/// The value of one state variable at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVariableValue {
    name: String,
    value: Option<Value>,
}

impl StateVariableValue {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Integer value, used by minimum-delta moderation.
    pub fn as_integer(&self) -> Option<i128> {
        self.value.as_ref().and_then(Value::as_integer)
    }

    pub fn to_wire_string(&self) -> String {
        self.value.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }
}

/// Reads a value off a service implementation of type `T`.
///
/// Accessors are registered per state variable, and per output argument for
/// methods whose results are read from the implementation or from a
/// returned instance.
pub struct StateVariableAccessor<T: ?Sized> {
    read: Arc<dyn Fn(&T) -> Result<Option<Value>, ExecutionError> + Send + Sync>,
}

impl<T: ?Sized> StateVariableAccessor<T> {
    pub fn new<F>(read: F) -> Self
    where
        F: Fn(&T) -> Result<Option<Value>, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
        }
    }

    /// Accessor for an infallible getter.
    pub fn getter<F, V>(get: F) -> Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Self::new(move |instance| Ok(Some(get(instance).into())))
    }

    pub fn read(&self, instance: &T) -> Result<Option<Value>, ExecutionError> {
        (self.read)(instance)
    }
}

impl<T: ?Sized> Clone for StateVariableAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
        }
    }
}

impl<T: ?Sized> fmt::Debug for StateVariableAccessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateVariableAccessor")
    }
}
