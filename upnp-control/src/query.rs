//! The legacy `QueryStateVariable` action.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use upnp_model::{
    ActionException, ActionInvocation, ErrorCode, ExecutionError, Service, ServiceManager,
    StateEventSource, Value,
};

use crate::executor::{execute_through_manager, ActionExecutor};

const VAR_NAME_ARGUMENT: &str = "varName";
const RETURN_ARGUMENT: &str = "return";

/// Answers `QueryStateVariable` by reading the named state variable through
/// the accessor registered with the service manager.
pub struct QueryStateVariableExecutor<T> {
    manager: Arc<dyn ServiceManager<T>>,
}

impl<T> QueryStateVariableExecutor<T> {
    pub fn new(manager: Arc<dyn ServiceManager<T>>) -> Self {
        Self { manager }
    }

    fn query(&self, invocation: &mut ActionInvocation, implementation: &mut T) -> Result<(), ExecutionError> {
        if !invocation.action().is_query_state_variable() {
            return Err(ExecutionError::msg(format!(
                "This executor only handles QueryStateVariable, not: {}",
                invocation.action().name()
            )));
        }
        if !self.manager.service().supports_query_state_variables() {
            return Err(ActionException::with_message(
                ErrorCode::InvalidAction,
                "This service does not support querying state variables",
            )
            .into());
        }

        let name = invocation
            .input(VAR_NAME_ARGUMENT)
            .map(|v| v.to_wire_string())
            .unwrap_or_default();

        if self.manager.service().state_variable(&name).is_none() {
            return Err(ActionException::with_message(
                ErrorCode::ArgumentValueInvalid,
                format!("No state variable found: {}", name),
            )
            .into());
        }
        let accessor = self.manager.state_variable_accessor(&name).ok_or_else(|| {
            ActionException::with_message(
                ErrorCode::ArgumentValueInvalid,
                format!("No accessor for state variable, can't read state: {}", name),
            )
        })?;

        debug!("Querying state variable '{}'", name);
        let value = accessor.read(implementation).map_err(|e| {
            ActionException::with_message(ErrorCode::ActionFailed, e.root_cause_message())
        })?;
        let text = value.map(|v| v.to_string()).unwrap_or_default();
        invocation.set_output(RETURN_ARGUMENT, Value::String(text))?;
        Ok(())
    }
}

impl<T: Send + 'static> ActionExecutor for QueryStateVariableExecutor<T> {
    fn execute(&self, invocation: &mut ActionInvocation) {
        execute_through_manager(self.manager.as_ref(), invocation, |invocation, implementation| {
            self.query(invocation, implementation)
        });
    }
}

impl<T> fmt::Debug for QueryStateVariableExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStateVariableExecutor")
            .field("service", &self.manager.service().service_id().to_string())
            .finish()
    }
}
