//! Action invocations and their validated argument values.

use std::net::IpAddr;

use crate::error::{ActionException, ErrorCode, InvalidValueError};
use crate::message::UpnpHeaders;
use crate::meta::{Action, ActionArgument, Direction};
use crate::types::{Datatype, Value};

/// An argument paired with a value that satisfies its declared type.
///
/// Values are validated at construction. String input for a non-string
/// argument is parsed into the argument's datatype first.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionArgumentValue {
    argument: ActionArgument,
    value: Option<Value>,
}

impl ActionArgumentValue {
    pub fn new(argument: ActionArgument, value: Option<Value>) -> Result<Self, InvalidValueError> {
        let value = match value {
            Some(Value::String(s)) if argument.datatype() != Datatype::String => {
                Some(argument.datatype().value_of(&s).map_err(|e| {
                    InvalidValueError::new(format!(
                        "Invalid value for argument '{}': {}",
                        argument.name(),
                        e.message()
                    ))
                })?)
            }
            other => other,
        };

        if let Some(v) = &value {
            argument.type_details().validate(v).map_err(|e| {
                InvalidValueError::new(format!(
                    "Invalid value for argument '{}': {}",
                    argument.name(),
                    e.message()
                ))
            })?;
        }

        Ok(Self { argument, value })
    }

    pub fn argument(&self) -> &ActionArgument {
        &self.argument
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Wire form of the value, empty for null.
    pub fn to_wire_string(&self) -> String {
        self.value.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }
}

/// Details about the control point that sent an action request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteClientInfo {
    pub remote_address: Option<IpAddr>,
    pub local_address: Option<IpAddr>,
    pub request_headers: UpnpHeaders,
    /// Headers an implementation wants added to the response.
    pub extra_response_headers: UpnpHeaders,
}

impl RemoteClientInfo {
    pub fn new(remote_address: IpAddr, request_headers: UpnpHeaders) -> Self {
        Self {
            remote_address: Some(remote_address),
            local_address: None,
            request_headers,
            extra_response_headers: UpnpHeaders::new(),
        }
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.request_headers.get("User-Agent")
    }
}

/// One call of an action: inputs, outputs and the failure, if any.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    action: Action,
    input: Vec<ActionArgumentValue>,
    output: Vec<ActionArgumentValue>,
    failure: Option<ActionException>,
    client_info: Option<RemoteClientInfo>,
}

impl ActionInvocation {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            input: Vec::new(),
            output: Vec::new(),
            failure: None,
            client_info: None,
        }
    }

    pub fn with_client_info(mut self, client_info: RemoteClientInfo) -> Self {
        self.client_info = Some(client_info);
        self
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn client_info(&self) -> Option<&RemoteClientInfo> {
        self.client_info.as_ref()
    }

    pub fn client_info_mut(&mut self) -> Option<&mut RemoteClientInfo> {
        self.client_info.as_mut()
    }

    /// Set an input by argument name or alias.
    pub fn set_input(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ActionException> {
        self.set_input_value(name, Some(value.into()))
    }

    pub fn set_input_value(&mut self, name: &str, value: Option<Value>) -> Result<(), ActionException> {
        let argument = self
            .action
            .input_argument(name)
            .cloned()
            .ok_or_else(|| no_such_argument(self.action.name(), "input", name))?;
        let value = ActionArgumentValue::new(argument, value)?;
        self.put_input(value);
        Ok(())
    }

    pub fn put_input(&mut self, value: ActionArgumentValue) {
        replace_by_name(&mut self.input, value);
    }

    pub fn input(&self, name: &str) -> Option<&ActionArgumentValue> {
        self.input.iter().find(|v| v.argument().is_name_or_alias(name))
    }

    /// Input values in declaration order.
    pub fn inputs(&self) -> Vec<&ActionArgumentValue> {
        self.action
            .input_arguments()
            .filter_map(|a| self.input(a.name()))
            .collect()
    }

    pub fn set_output(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ActionException> {
        self.set_output_value(name, Some(value.into()))
    }

    pub fn set_output_value(&mut self, name: &str, value: Option<Value>) -> Result<(), ActionException> {
        let argument = self
            .action
            .output_argument(name)
            .cloned()
            .ok_or_else(|| no_such_argument(self.action.name(), "output", name))?;
        let value = ActionArgumentValue::new(argument, value)?;
        self.put_output(value);
        Ok(())
    }

    pub fn put_output(&mut self, value: ActionArgumentValue) {
        debug_assert_eq!(value.argument().direction(), Direction::Out);
        replace_by_name(&mut self.output, value);
    }

    pub fn output(&self, name: &str) -> Option<&ActionArgumentValue> {
        self.output.iter().find(|v| v.argument().is_name_or_alias(name))
    }

    /// Output values in declaration order.
    pub fn outputs(&self) -> Vec<&ActionArgumentValue> {
        self.action
            .output_arguments()
            .filter_map(|a| self.output(a.name()))
            .collect()
    }

    pub fn failure(&self) -> Option<&ActionException> {
        self.failure.as_ref()
    }

    pub fn set_failure(&mut self, failure: ActionException) {
        self.failure = Some(failure);
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

fn replace_by_name(values: &mut Vec<ActionArgumentValue>, value: ActionArgumentValue) {
    match values
        .iter_mut()
        .find(|v| v.argument().name() == value.argument().name())
    {
        Some(existing) => *existing = value,
        None => values.push(value),
    }
}

fn no_such_argument(action: &str, kind: &str, name: &str) -> ActionException {
    ActionException::with_message(
        ErrorCode::InvalidArgs,
        format!("Action '{}' has no {} argument '{}'", action, kind, name),
    )
}
