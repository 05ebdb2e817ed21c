//! The action execution contract shared by all executors.
//!
//! Executors never return errors. Every failure raised while an action runs
//! ends up on the [`ActionInvocation`] as an [`ActionException`]:
//!
//! - an `ActionException` raised by the implementation is attached as is
//! - an interruption becomes a cancelled fault
//! - anything else is unwrapped to its root cause and attached as an
//!   `ActionFailed` fault carrying the root cause's message

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};
use upnp_model::{
    Action, ActionArgument, ActionArgumentValue, ActionException, ActionInvocation, ErrorCode,
    ExecutionError, ServiceManager, StateVariableAccessor, Value,
};

/// Executes invocations of one action of a hosted service.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, invocation: &mut ActionInvocation);
}

/// Run `body` with exclusive access to the implementation managed by
/// `manager` and classify whatever it fails with onto `invocation`.
pub fn execute_through_manager<T>(
    manager: &dyn ServiceManager<T>,
    invocation: &mut ActionInvocation,
    mut body: impl FnMut(&mut ActionInvocation, &mut T) -> Result<(), ExecutionError>,
) {
    let result = manager.execute(&mut |implementation| body(invocation, implementation));
    if let Err(e) = result {
        let failure = classify_failure(e);
        warn!(
            action = invocation.action().name(),
            code = failure.error_code(),
            "Action execution failed: {}",
            failure.message()
        );
        invocation.set_failure(failure);
    }
}

/// Turn any execution failure into the fault reported to the control point.
pub fn classify_failure(error: ExecutionError) -> ActionException {
    match error {
        ExecutionError::Action(e) => e,
        ExecutionError::Interrupted => ActionException::cancelled(),
        other => {
            let root_cause = other.root_cause_message();
            ActionException::with_message(ErrorCode::ActionFailed, &root_cause).caused_by(root_cause)
        }
    }
}

/// Set an output argument from a raw result value.
///
/// Values of text-convertible types are stringified first; an invalid value
/// is an `ArgumentValueInvalid` fault naming the argument.
pub fn set_output_argument_value(
    invocation: &mut ActionInvocation,
    argument: &ActionArgument,
    result: Option<Value>,
) -> Result<(), ActionException> {
    let value = result.map(|v| match v {
        Value::Char(_) | Value::Uri(_) | Value::Uuid(_) => Value::String(v.to_string()),
        other => other,
    });
    let value = ActionArgumentValue::new(argument.clone(), value).map_err(|e| {
        ActionException::with_message(
            ErrorCode::ArgumentValueInvalid,
            format!(
                "Wrong type or invalid value for '{}': {}",
                argument.name(),
                e.message()
            ),
        )
    })?;
    invocation.put_output(value);
    Ok(())
}

/// Reads an output argument value off a service implementation or off an
/// instance returned by an action method.
#[derive(Clone)]
pub struct OutputAccessor {
    read: Arc<dyn Fn(&dyn Any) -> Result<Option<Value>, ExecutionError> + Send + Sync>,
}

impl OutputAccessor {
    /// Accessor applied to instances of type `U`.
    pub fn of<U, F>(read: F) -> Self
    where
        U: Any,
        F: Fn(&U) -> Result<Option<Value>, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(move |instance: &dyn Any| match instance.downcast_ref::<U>() {
                Some(instance) => read(instance),
                None => Err(ExecutionError::msg(format!(
                    "Output accessor expects an instance of {}",
                    std::any::type_name::<U>()
                ))),
            }),
        }
    }

    /// Accessor for an infallible getter on `U`.
    pub fn getter<U, F, V>(get: F) -> Self
    where
        U: Any,
        F: Fn(&U) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Self::of(move |instance: &U| Ok(Some(get(instance).into())))
    }

    /// Reuse a state variable accessor of the implementation type.
    pub fn from_state_variable_accessor<T: Any>(accessor: StateVariableAccessor<T>) -> Self {
        Self::of(move |instance: &T| accessor.read(instance))
    }

    pub fn read(&self, instance: &dyn Any) -> Result<Option<Value>, ExecutionError> {
        (self.read)(instance)
    }
}

impl fmt::Debug for OutputAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputAccessor")
    }
}

/// Output values read through accessors: one value for a single output
/// argument, otherwise one per output argument in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValues {
    Single(Option<Value>),
    Multiple(Vec<Option<Value>>),
}

/// Read every output argument of `action` off `instance`.
pub fn read_output_argument_values(
    action: &Action,
    accessors: &dyn Fn(&str) -> Option<OutputAccessor>,
    instance: &dyn Any,
) -> Result<OutputValues, ExecutionError> {
    let mut results = Vec::new();
    for argument in action.output_arguments() {
        trace!("Calling accessor to read output argument value: {}", argument.name());
        let accessor = accessors(argument.name()).ok_or_else(|| {
            ExecutionError::msg(format!("No accessor bound for: {}", argument.name()))
        })?;
        results.push(accessor.read(instance)?);
    }
    if results.len() == 1 {
        return Ok(OutputValues::Single(results.pop().flatten()));
    }
    Ok(OutputValues::Multiple(results))
}
