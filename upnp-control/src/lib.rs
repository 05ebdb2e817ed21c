//! Action invocation for services hosted by upnp-sdk.
//!
//! An [`ActionExecutor`] runs one action of a local service against the
//! service implementation owned by a [`upnp_model::ServiceManager`]:
//!
//! - [`MethodActionExecutor`] calls a bound [`ActionMethod`] and maps its
//!   result onto the action's output arguments
//! - [`QueryStateVariableExecutor`] answers the legacy `QueryStateVariable`
//!   action through state variable accessors
//!
//! Executors never return errors; failures are recorded on the invocation.

pub mod executor;
pub mod method;
pub mod query;

pub use executor::{
    classify_failure, execute_through_manager, read_output_argument_values,
    set_output_argument_value, ActionExecutor, OutputAccessor, OutputValues,
};
pub use method::{
    ActionMethod, MethodActionExecutor, MethodArgument, MethodArguments, MethodResult,
    ParameterKind,
};
pub use query::QueryStateVariableExecutor;
