//! Function-table dispatch of actions to service implementation methods.
//!
//! Each action of a hosted service is bound at registration time to an
//! [`ActionMethod`]: the declared kind of every parameter, whether the
//! method takes the caller's [`RemoteClientInfo`], whether it returns a
//! value, and the function that performs the call. Output arguments are
//! read either from the returned value or through [`OutputAccessor`]s.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;
use upnp_model::{
    ActionException, ActionInvocation, ErrorCode, ExecutionError, RemoteClientInfo, ServiceManager,
    Value,
};

use crate::executor::{
    execute_through_manager, read_output_argument_values, set_output_argument_value,
    ActionExecutor, OutputAccessor, OutputValues,
};

type StringConverter = Arc<dyn Fn(&str) -> Result<Box<dyn Any + Send>, String> + Send + Sync>;

/// How a method parameter receives its input argument.
#[derive(Clone)]
pub enum ParameterKind {
    /// Requires a value; null or empty input is rejected.
    Primitive,
    /// Typed value passed as is, possibly null.
    Value,
    /// Enumerated value passed as is, never converted.
    Enum,
    /// Built from the input's string form, e.g. a domain type parsed from
    /// text. Empty input is passed as is.
    Converted(StringConverter),
}

impl ParameterKind {
    pub fn converted<U, E, F>(convert: F) -> Self
    where
        U: Any + Send,
        E: fmt::Display,
        F: Fn(&str) -> Result<U, E> + Send + Sync + 'static,
    {
        ParameterKind::Converted(Arc::new(move |s: &str| {
            convert(s)
                .map(|u| Box::new(u) as Box<dyn Any + Send>)
                .map_err(|e| e.to_string())
        }))
    }

    /// Parameter built with the type's [`std::str::FromStr`] implementation.
    pub fn parsed<U>() -> Self
    where
        U: std::str::FromStr + Any + Send,
        U::Err: fmt::Display,
    {
        Self::converted(|s: &str| s.parse::<U>())
    }
}

impl fmt::Debug for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Primitive => f.write_str("Primitive"),
            ParameterKind::Value => f.write_str("Value"),
            ParameterKind::Enum => f.write_str("Enum"),
            ParameterKind::Converted(_) => f.write_str("Converted"),
        }
    }
}

/// One prepared input argument.
pub enum MethodArgument {
    Value(Option<Value>),
    Converted(Box<dyn Any + Send>),
}

/// The positional arguments handed to an action method.
pub struct MethodArguments {
    values: Vec<MethodArgument>,
    client_info: Option<RemoteClientInfo>,
}

impl MethodArguments {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.values.get(index) {
            Some(MethodArgument::Value(value)) => value.as_ref(),
            _ => None,
        }
    }

    pub fn converted<U: Any>(&self, index: usize) -> Option<&U> {
        match self.values.get(index) {
            Some(MethodArgument::Converted(value)) => value.downcast_ref::<U>(),
            _ => None,
        }
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        self.value(index).and_then(Value::as_str)
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        match self.value(index) {
            Some(Value::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn integer(&self, index: usize) -> Option<i128> {
        self.value(index).and_then(Value::as_integer)
    }

    /// Caller details, present only for methods that accept them and
    /// invocations that carry them.
    pub fn client_info(&self) -> Option<&RemoteClientInfo> {
        self.client_info.as_ref()
    }
}

/// What an action method returned.
pub enum MethodResult {
    Void,
    Value(Option<Value>),
    /// An object whose fields are read through output accessors.
    Instance(Box<dyn Any + Send>),
}

impl MethodResult {
    pub fn value(value: impl Into<Value>) -> Self {
        MethodResult::Value(Some(value.into()))
    }

    pub fn instance<U: Any + Send>(instance: U) -> Self {
        MethodResult::Instance(Box::new(instance))
    }
}

type Invoke<T> =
    Arc<dyn Fn(&mut T, MethodArguments) -> Result<MethodResult, ExecutionError> + Send + Sync>;

/// An action bound to a method of the implementation type `T`.
pub struct ActionMethod<T> {
    name: String,
    parameters: Vec<ParameterKind>,
    accepts_client_info: bool,
    returns_value: bool,
    invoke: Invoke<T>,
}

impl<T> Clone for ActionMethod<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            parameters: self.parameters.clone(),
            accepts_client_info: self.accepts_client_info,
            returns_value: self.returns_value,
            invoke: Arc::clone(&self.invoke),
        }
    }
}

impl<T> ActionMethod<T> {
    /// A method with no parameters that returns nothing.
    pub fn new<F>(name: impl Into<String>, invoke: F) -> Self
    where
        F: Fn(&mut T, MethodArguments) -> Result<MethodResult, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            accepts_client_info: false,
            returns_value: false,
            invoke: Arc::new(invoke),
        }
    }

    pub fn parameter(mut self, kind: ParameterKind) -> Self {
        self.parameters.push(kind);
        self
    }

    /// The last parameter takes the caller's [`RemoteClientInfo`].
    pub fn accepts_client_info(mut self) -> Self {
        self.accepts_client_info = true;
        self
    }

    pub fn returns_value(mut self) -> Self {
        self.returns_value = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_void(&self) -> bool {
        !self.returns_value
    }
}

impl<T> fmt::Debug for ActionMethod<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMethod")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("accepts_client_info", &self.accepts_client_info)
            .field("returns_value", &self.returns_value)
            .finish()
    }
}

/// Executes an action by calling the bound method of the implementation.
pub struct MethodActionExecutor<T> {
    manager: Arc<dyn ServiceManager<T>>,
    method: ActionMethod<T>,
    output_accessors: HashMap<String, OutputAccessor>,
}

impl<T: Any> MethodActionExecutor<T> {
    pub fn new(manager: Arc<dyn ServiceManager<T>>, method: ActionMethod<T>) -> Self {
        Self {
            manager,
            method,
            output_accessors: HashMap::new(),
        }
    }

    /// Read output argument `name` through `accessor` instead of using the
    /// returned value.
    pub fn with_output_accessor(mut self, name: impl Into<String>, accessor: OutputAccessor) -> Self {
        self.output_accessors.insert(name.into(), accessor);
        self
    }

    pub fn method(&self) -> &ActionMethod<T> {
        &self.method
    }

    fn uses_output_accessors(&self, invocation: &ActionInvocation) -> bool {
        invocation
            .action()
            .output_arguments()
            .any(|a| self.output_accessors.contains_key(a.name()))
    }

    fn accessor(&self, name: &str) -> Option<OutputAccessor> {
        self.output_accessors.get(name).cloned()
    }

    /// Build the positional arguments for the method from the invocation.
    pub fn create_input_argument_values(
        &self,
        invocation: &ActionInvocation,
    ) -> Result<MethodArguments, ActionException> {
        let mut values = Vec::with_capacity(self.method.parameters.len());

        for (i, argument) in invocation.action().input_arguments().enumerate() {
            let kind = self.method.parameters.get(i).ok_or_else(|| {
                ActionException::with_message(
                    ErrorCode::ActionFailed,
                    format!(
                        "Method '{}' declares no parameter for input argument '{}'",
                        self.method.name,
                        argument.name()
                    ),
                )
            })?;
            let input = invocation.input(argument.name());
            let text = input.map(|v| v.to_wire_string()).unwrap_or_default();

            if matches!(kind, ParameterKind::Primitive) && text.is_empty() {
                return Err(ActionException::with_message(
                    ErrorCode::ArgumentValueInvalid,
                    format!(
                        "Primitive action method argument '{}' requires input value, can't be null or empty string",
                        argument.name()
                    ),
                ));
            }

            let Some(input) = input else {
                values.push(MethodArgument::Value(None));
                continue;
            };

            match kind {
                ParameterKind::Converted(convert) if !text.is_empty() => {
                    trace!("Creating input argument value from string for '{}'", argument.name());
                    let converted = convert(&text).map_err(|e| {
                        ActionException::with_message(
                            ErrorCode::ArgumentValueInvalid,
                            format!(
                                "Can't convert input argument string to desired type of '{}': {}",
                                argument.name(),
                                e
                            ),
                        )
                    })?;
                    values.push(MethodArgument::Converted(converted));
                }
                _ => values.push(MethodArgument::Value(input.value().cloned())),
            }
        }

        let client_info = if self.method.accepts_client_info {
            invocation.client_info().cloned()
        } else {
            None
        };

        Ok(MethodArguments {
            values,
            client_info,
        })
    }

    fn execute_on(&self, invocation: &mut ActionInvocation, implementation: &mut T) -> Result<(), ExecutionError> {
        let arguments = self.create_input_argument_values(invocation)?;

        if !invocation.action().has_output_arguments() {
            trace!("Calling local service method with no output arguments: {}", self.method.name);
            (self.method.invoke)(implementation, arguments)?;
            return Ok(());
        }

        let mut array_result_processed = true;
        let outcome = if self.method.is_void() {
            trace!("Action method is void, reading output arguments from service instance");
            (self.method.invoke)(implementation, arguments)?;
            let instance: &dyn Any = &*implementation;
            read_output_argument_values(invocation.action(), &|n| self.accessor(n), instance)?
        } else if self.uses_output_accessors(invocation) {
            trace!("Action method is not void, reading output arguments from returned instance");
            let returned = match (self.method.invoke)(implementation, arguments)? {
                MethodResult::Instance(instance) => instance,
                _ => {
                    return Err(ExecutionError::msg(format!(
                        "Method '{}' must return an instance for its output accessors",
                        self.method.name
                    )))
                }
            };
            read_output_argument_values(invocation.action(), &|n| self.accessor(n), returned.as_ref())?
        } else {
            trace!("Action method is not void, using returned value as (single) output argument");
            array_result_processed = false;
            match (self.method.invoke)(implementation, arguments)? {
                MethodResult::Void => OutputValues::Single(None),
                MethodResult::Value(value) => OutputValues::Single(value),
                MethodResult::Instance(_) => {
                    return Err(ActionException::with_message(
                        ErrorCode::ArgumentValueInvalid,
                        format!(
                            "Method '{}' returned an instance but no output accessors are bound",
                            self.method.name
                        ),
                    )
                    .into())
                }
            }
        };

        let output_arguments: Vec<_> = invocation.action().output_arguments().cloned().collect();

        match outcome {
            OutputValues::Multiple(results) if array_result_processed => {
                trace!("Accessors returned {} values, setting output argument values", results.len());
                for (argument, result) in output_arguments.iter().zip(results) {
                    set_output_argument_value(invocation, argument, result)?;
                }
            }
            OutputValues::Single(result) if output_arguments.len() == 1 => {
                set_output_argument_value(invocation, &output_arguments[0], result)?;
            }
            _ => {
                return Err(ActionException::with_message(
                    ErrorCode::ActionFailed,
                    format!(
                        "Method return does not match required number of output arguments: {}",
                        output_arguments.len()
                    ),
                )
                .into())
            }
        }
        Ok(())
    }
}

impl<T: Any> ActionExecutor for MethodActionExecutor<T> {
    fn execute(&self, invocation: &mut ActionInvocation) {
        execute_through_manager(self.manager.as_ref(), invocation, |invocation, implementation| {
            self.execute_on(invocation, implementation)
        });
    }
}

impl<T> fmt::Debug for MethodActionExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodActionExecutor")
            .field("method", &self.method)
            .field("output_accessors", &self.output_accessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use upnp_model::{
        Action, ActionArgument, Datatype, DefaultServiceManager, LocalService, Service,
        ServiceId, ServiceType, StateVariable, StateVariableTypeDetails, Udn,
    };

    struct Counter {
        step: u32,
    }

    fn executor(method: ActionMethod<Counter>) -> (MethodActionExecutor<Counter>, Action) {
        let service = LocalService::new(
            Udn::new("uuid:counter"),
            ServiceType::upnp("Counter", 1),
            ServiceId::upnp("Counter"),
            vec![
                StateVariable::new("Step", StateVariableTypeDetails::new(Datatype::Ui4)),
                StateVariable::new("Label", StateVariableTypeDetails::new(Datatype::String)),
            ],
            vec![Action::new(
                "Configure",
                vec![
                    ActionArgument::input("NewStep", "Step"),
                    ActionArgument::input("NewLabel", "Label"),
                ],
            )],
        )
        .unwrap();
        let action = service.actions()[0].clone();
        let manager = DefaultServiceManager::new(Arc::new(service), |_| Ok(Counter { step: 1 }));
        (MethodActionExecutor::new(Arc::new(manager), method), action)
    }

    fn configure() -> ActionMethod<Counter> {
        ActionMethod::new("configure", |counter: &mut Counter, args| {
            counter.step = args.integer(0).unwrap_or(0) as u32;
            Ok(MethodResult::Void)
        })
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    fn test_primitive_requires_input(#[case] label: Option<&str>) {
        let (executor, action) = executor(
            configure()
                .parameter(ParameterKind::Value)
                .parameter(ParameterKind::Primitive),
        );
        let mut invocation = ActionInvocation::new(action);
        invocation.set_input("NewStep", 3u32).unwrap();
        if let Some(label) = label {
            invocation.set_input("NewLabel", label).unwrap();
        }
        let err = executor.create_input_argument_values(&invocation).err().unwrap();
        assert_eq!(err.error_code(), 600);
        assert!(err.message().contains(
            "Primitive action method argument 'NewLabel' requires input value, can't be null or empty string"
        ));
    }

    #[test]
    fn test_value_parameter_passes_null() {
        let (executor, action) = executor(
            configure()
                .parameter(ParameterKind::Value)
                .parameter(ParameterKind::Value),
        );
        let mut invocation = ActionInvocation::new(action);
        invocation.set_input("NewStep", 3u32).unwrap();
        let args = executor.create_input_argument_values(&invocation).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args.integer(0), Some(3));
        assert_eq!(args.value(1), None);
        assert!(args.client_info().is_none());
    }

    #[test]
    fn test_converted_parameter_failure_names_argument() {
        let (executor, action) = executor(
            configure()
                .parameter(ParameterKind::Value)
                .parameter(ParameterKind::parsed::<std::net::Ipv4Addr>()),
        );
        let mut invocation = ActionInvocation::new(action);
        invocation.set_input("NewStep", 3u32).unwrap();
        invocation.set_input("NewLabel", "not-an-address").unwrap();
        let err = executor.create_input_argument_values(&invocation).err().unwrap();
        assert_eq!(err.error_code(), 600);
        assert!(err
            .message()
            .contains("Can't convert input argument string to desired type of 'NewLabel'"));
    }

    #[test]
    fn test_converted_parameter() {
        let (executor, action) = executor(
            configure()
                .parameter(ParameterKind::Value)
                .parameter(ParameterKind::parsed::<std::net::Ipv4Addr>()),
        );
        let mut invocation = ActionInvocation::new(action);
        invocation.set_input("NewStep", 3u32).unwrap();
        invocation.set_input("NewLabel", "10.0.0.7").unwrap();
        let args = executor.create_input_argument_values(&invocation).unwrap();
        assert_eq!(
            args.converted::<std::net::Ipv4Addr>(1),
            Some(&std::net::Ipv4Addr::new(10, 0, 0, 7))
        );
    }

    #[test]
    fn test_missing_parameter_declaration() {
        let (executor, action) = executor(configure().parameter(ParameterKind::Value));
        let invocation = ActionInvocation::new(action);
        let err = executor.create_input_argument_values(&invocation).err().unwrap();
        assert_eq!(err.error_code(), 501);
    }

    #[test]
    fn test_no_output_method_is_invoked() {
        let (executor, action) = executor(
            configure()
                .parameter(ParameterKind::Primitive)
                .parameter(ParameterKind::Value),
        );
        let mut invocation = ActionInvocation::new(action);
        invocation.set_input("NewStep", 7u32).unwrap();
        executor.execute(&mut invocation);
        assert!(invocation.is_success());
        assert!(invocation.outputs().is_empty());
    }
}
