//! Service metadata: state variables, actions and their arguments.
//!
//! Only the parts of a service description that the runtime needs are
//! modelled here. Descriptor parsing and generation live elsewhere.

use std::collections::HashSet;
use std::fmt;

use tracing::warn;
use url::Url;

use crate::error::{InvalidValueError, ModelError, Result};
use crate::types::{Datatype, Value};

/// How changes of a state variable are evented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateVariableEventDetails {
    pub send_events: bool,
    /// Minimum milliseconds between two events for this variable, 0 = no limit.
    pub maximum_rate_millis: u32,
    /// Minimum numeric change that triggers an event, 0 = any change.
    pub minimum_delta: u32,
}

impl Default for StateVariableEventDetails {
    fn default() -> Self {
        Self {
            send_events: true,
            maximum_rate_millis: 0,
            minimum_delta: 0,
        }
    }
}

impl StateVariableEventDetails {
    pub fn not_evented() -> Self {
        Self {
            send_events: false,
            ..Self::default()
        }
    }

    pub fn with_maximum_rate_millis(mut self, millis: u32) -> Self {
        self.maximum_rate_millis = millis;
        self
    }

    pub fn with_minimum_delta(mut self, delta: u32) -> Self {
        self.minimum_delta = delta;
        self
    }
}

/// Inclusive numeric range a value must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedValueRange {
    minimum: i64,
    maximum: i64,
    step: i64,
}

impl AllowedValueRange {
    /// A minimum greater than the maximum is swapped with it.
    pub fn new(minimum: i64, maximum: i64) -> Self {
        Self::with_step(minimum, maximum, 1)
    }

    pub fn with_step(minimum: i64, maximum: i64, step: i64) -> Self {
        let (minimum, maximum) = if minimum > maximum {
            warn!(
                "Allowed value range minimum '{}' is greater than maximum '{}', switching values",
                minimum, maximum
            );
            (maximum, minimum)
        } else {
            (minimum, maximum)
        };
        Self {
            minimum,
            maximum,
            step,
        }
    }

    pub fn minimum(&self) -> i64 {
        self.minimum
    }

    pub fn maximum(&self) -> i64 {
        self.maximum
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn is_in_range(&self, value: i128) -> bool {
        value >= self.minimum as i128 && value <= self.maximum as i128
    }
}

/// Datatype and value constraints shared by state variables and the
/// arguments related to them.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVariableTypeDetails {
    datatype: Datatype,
    default_value: Option<String>,
    allowed_values: Option<Vec<String>>,
    allowed_value_range: Option<AllowedValueRange>,
}

impl StateVariableTypeDetails {
    pub fn new(datatype: Datatype) -> Self {
        Self {
            datatype,
            default_value: None,
            allowed_values: None,
            allowed_value_range: None,
        }
    }

    pub fn with_default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_allowed_value_range(mut self, range: AllowedValueRange) -> Self {
        self.allowed_value_range = Some(range);
        self
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        self.allowed_values.as_deref()
    }

    pub fn allowed_value_range(&self) -> Option<&AllowedValueRange> {
        self.allowed_value_range.as_ref()
    }

    /// Check a typed value against the datatype, allowed values and range.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), InvalidValueError> {
        if !self.datatype.is_valid(value) {
            return Err(InvalidValueError::new(format!(
                "'{}' is not a valid {}",
                value, self.datatype
            )));
        }
        if let Some(allowed) = &self.allowed_values {
            let text = value.to_string();
            if !allowed.iter().any(|a| a == &text) {
                return Err(InvalidValueError::new(format!(
                    "'{}' is not one of the allowed values",
                    text
                )));
            }
        }
        if let (Some(range), Some(n)) = (&self.allowed_value_range, value.as_integer()) {
            if !range.is_in_range(n) {
                return Err(InvalidValueError::new(format!(
                    "{} is outside the allowed range {}..={}",
                    n,
                    range.minimum(),
                    range.maximum()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateVariable {
    name: String,
    type_details: StateVariableTypeDetails,
    event_details: StateVariableEventDetails,
}

impl StateVariable {
    pub fn new(name: impl Into<String>, type_details: StateVariableTypeDetails) -> Self {
        Self {
            name: name.into(),
            type_details,
            event_details: StateVariableEventDetails::default(),
        }
    }

    pub fn with_event_details(mut self, event_details: StateVariableEventDetails) -> Self {
        self.event_details = event_details;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_details(&self) -> &StateVariableTypeDetails {
        &self.type_details
    }

    pub fn event_details(&self) -> &StateVariableEventDetails {
        &self.event_details
    }

    /// Integer variable whose events are throttled by a minimum delta.
    pub fn is_moderated_numeric_type(&self) -> bool {
        self.type_details.datatype().is_numeric() && self.event_details.minimum_delta > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionArgument {
    name: String,
    aliases: Vec<String>,
    related_state_variable: String,
    direction: Direction,
    return_value: bool,
    type_details: StateVariableTypeDetails,
}

impl ActionArgument {
    /// Argument typed as a string until it is bound to its service.
    pub fn new(
        name: impl Into<String>,
        related_state_variable: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            related_state_variable: related_state_variable.into(),
            direction,
            return_value: false,
            type_details: StateVariableTypeDetails::new(Datatype::String),
        }
    }

    pub fn input(name: impl Into<String>, related_state_variable: impl Into<String>) -> Self {
        Self::new(name, related_state_variable, Direction::In)
    }

    pub fn output(name: impl Into<String>, related_state_variable: impl Into<String>) -> Self {
        Self::new(name, related_state_variable, Direction::Out)
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn as_return_value(mut self) -> Self {
        self.return_value = true;
        self
    }

    pub fn with_type_details(mut self, type_details: StateVariableTypeDetails) -> Self {
        self.type_details = type_details;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn is_name_or_alias(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    pub fn related_state_variable(&self) -> &str {
        &self.related_state_variable
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_return_value(&self) -> bool {
        self.return_value
    }

    pub fn type_details(&self) -> &StateVariableTypeDetails {
        &self.type_details
    }

    pub fn datatype(&self) -> Datatype {
        self.type_details.datatype()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    name: String,
    arguments: Vec<ActionArgument>,
}

impl Action {
    pub fn new(name: impl Into<String>, arguments: Vec<ActionArgument>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[ActionArgument] {
        &self.arguments
    }

    pub fn input_arguments(&self) -> impl Iterator<Item = &ActionArgument> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == Direction::In)
    }

    pub fn output_arguments(&self) -> impl Iterator<Item = &ActionArgument> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == Direction::Out)
    }

    pub fn input_argument(&self, name: &str) -> Option<&ActionArgument> {
        self.input_arguments().find(|a| a.is_name_or_alias(name))
    }

    pub fn output_argument(&self, name: &str) -> Option<&ActionArgument> {
        self.output_arguments().find(|a| a.is_name_or_alias(name))
    }

    pub fn has_output_arguments(&self) -> bool {
        self.output_arguments().next().is_some()
    }

    /// The legacy `QueryStateVariable` action every service answers.
    pub fn query_state_variable() -> Self {
        Self::new(
            QUERY_STATE_VARIABLE_ACTION,
            vec![
                ActionArgument::input("varName", "VirtualQueryActionInput")
                    .with_type_details(StateVariableTypeDetails::new(Datatype::String)),
                ActionArgument::output("return", "VirtualQueryActionOutput")
                    .as_return_value()
                    .with_type_details(StateVariableTypeDetails::new(Datatype::String)),
            ],
        )
    }

    pub fn is_query_state_variable(&self) -> bool {
        self.name == QUERY_STATE_VARIABLE_ACTION
    }
}

pub const QUERY_STATE_VARIABLE_ACTION: &str = "QueryStateVariable";

/// Unique device name, usually `uuid:...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Udn(String);

impl Udn {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// Identifier without the `uuid:` prefix.
    pub fn identifier_string(&self) -> &str {
        self.0.strip_prefix("uuid:").unwrap_or(&self.0)
    }
}

impl fmt::Display for Udn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `urn:<namespace>:serviceId:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    namespace: String,
    id: String,
}

impl ServiceId {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Service id in the `upnp-org` namespace.
    pub fn upnp(id: impl Into<String>) -> Self {
        Self::new("upnp-org", id)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:serviceId:{}", self.namespace, self.id)
    }
}

/// `urn:<namespace>:service:<type>:<version>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType {
    namespace: String,
    type_name: String,
    version: u32,
}

impl ServiceType {
    pub fn new(namespace: impl Into<String>, type_name: impl Into<String>, version: u32) -> Self {
        Self {
            namespace: namespace.into(),
            type_name: type_name.into(),
            version,
        }
    }

    pub fn upnp(type_name: impl Into<String>, version: u32) -> Self {
        Self::new("schemas-upnp-org", type_name, version)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "urn:{}:service:{}:{}",
            self.namespace, self.type_name, self.version
        )
    }
}

/// Common view of local and remote services.
pub trait Service: Send + Sync {
    fn udn(&self) -> &Udn;
    fn service_id(&self) -> &ServiceId;
    fn service_type(&self) -> &ServiceType;
    fn state_variables(&self) -> &[StateVariable];
    fn actions(&self) -> &[Action];

    fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables().iter().find(|sv| sv.name() == name)
    }

    fn action(&self, name: &str) -> Option<&Action> {
        self.actions().iter().find(|a| a.name() == name)
    }

    fn has_evented_state_variables(&self) -> bool {
        self.state_variables()
            .iter()
            .any(|sv| sv.event_details().send_events)
    }
}

/// Metadata shared by both service kinds, with arguments bound to the types
/// of their related state variables.
#[derive(Debug, Clone, PartialEq)]
struct ServiceMetadata {
    udn: Udn,
    service_id: ServiceId,
    service_type: ServiceType,
    state_variables: Vec<StateVariable>,
    actions: Vec<Action>,
}

impl ServiceMetadata {
    fn bind(
        udn: Udn,
        service_type: ServiceType,
        service_id: ServiceId,
        state_variables: Vec<StateVariable>,
        actions: Vec<Action>,
    ) -> Result<Self> {
        let mut names = HashSet::new();
        for sv in &state_variables {
            if !names.insert(sv.name()) {
                return Err(ModelError::Duplicate {
                    kind: "state variable",
                    name: sv.name().to_string(),
                });
            }
        }

        let mut action_names = HashSet::new();
        let mut bound_actions = Vec::with_capacity(actions.len());
        for action in actions {
            if !action_names.insert(action.name().to_string()) {
                return Err(ModelError::Duplicate {
                    kind: "action",
                    name: action.name().to_string(),
                });
            }
            if action.is_query_state_variable() {
                bound_actions.push(action);
                continue;
            }
            let mut arguments = Vec::with_capacity(action.arguments.len());
            for argument in action.arguments {
                let related = state_variables
                    .iter()
                    .find(|sv| sv.name() == argument.related_state_variable())
                    .ok_or_else(|| ModelError::UnknownStateVariable {
                        action: action.name.clone(),
                        argument: argument.name().to_string(),
                        variable: argument.related_state_variable().to_string(),
                    })?;
                let type_details = related.type_details().clone();
                arguments.push(argument.with_type_details(type_details));
            }
            bound_actions.push(Action::new(action.name, arguments));
        }

        Ok(Self {
            udn,
            service_id,
            service_type,
            state_variables,
            actions: bound_actions,
        })
    }
}

/// A service hosted by this stack.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalService {
    metadata: ServiceMetadata,
    supports_query_state_variables: bool,
}

impl LocalService {
    /// Build a local service; argument types are taken from their related
    /// state variables.
    pub fn new(
        udn: Udn,
        service_type: ServiceType,
        service_id: ServiceId,
        state_variables: Vec<StateVariable>,
        actions: Vec<Action>,
    ) -> Result<Self> {
        let metadata =
            ServiceMetadata::bind(udn, service_type, service_id, state_variables, actions)?;
        Ok(Self {
            metadata,
            supports_query_state_variables: true,
        })
    }

    /// Whether the legacy `QueryStateVariable` action is answered.
    pub fn with_query_state_variables(mut self, supported: bool) -> Self {
        self.supports_query_state_variables = supported;
        self
    }

    pub fn supports_query_state_variables(&self) -> bool {
        self.supports_query_state_variables
    }
}

impl Service for LocalService {
    fn udn(&self) -> &Udn {
        &self.metadata.udn
    }

    fn service_id(&self) -> &ServiceId {
        &self.metadata.service_id
    }

    fn service_type(&self) -> &ServiceType {
        &self.metadata.service_type
    }

    fn state_variables(&self) -> &[StateVariable] {
        &self.metadata.state_variables
    }

    fn actions(&self) -> &[Action] {
        &self.metadata.actions
    }
}

/// A service on a device discovered on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteService {
    metadata: ServiceMetadata,
    device_base_url: Url,
    control_uri: String,
    event_subscription_uri: String,
}

impl RemoteService {
    pub fn new(
        udn: Udn,
        service_type: ServiceType,
        service_id: ServiceId,
        device_base_url: Url,
        control_uri: impl Into<String>,
        event_subscription_uri: impl Into<String>,
        state_variables: Vec<StateVariable>,
        actions: Vec<Action>,
    ) -> Result<Self> {
        let metadata =
            ServiceMetadata::bind(udn, service_type, service_id, state_variables, actions)?;
        Ok(Self {
            metadata,
            device_base_url,
            control_uri: control_uri.into(),
            event_subscription_uri: event_subscription_uri.into(),
        })
    }

    pub fn device_base_url(&self) -> &Url {
        &self.device_base_url
    }

    pub fn control_uri(&self) -> &str {
        &self.control_uri
    }

    pub fn event_subscription_uri(&self) -> &str {
        &self.event_subscription_uri
    }

    /// Event subscription URI resolved against the device base URL.
    pub fn event_subscription_url(&self) -> std::result::Result<Url, url::ParseError> {
        self.device_base_url.join(&self.event_subscription_uri)
    }

    pub fn control_url(&self) -> std::result::Result<Url, url::ParseError> {
        self.device_base_url.join(&self.control_uri)
    }
}

impl Service for RemoteService {
    fn udn(&self) -> &Udn {
        &self.metadata.udn
    }

    fn service_id(&self) -> &ServiceId {
        &self.metadata.service_id
    }

    fn service_type(&self) -> &ServiceType {
        &self.metadata.service_type
    }

    fn state_variables(&self) -> &[StateVariable] {
        &self.metadata.state_variables
    }

    fn actions(&self) -> &[Action] {
        &self.metadata.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> StateVariable {
        StateVariable::new(
            "Volume",
            StateVariableTypeDetails::new(Datatype::Ui2)
                .with_allowed_value_range(AllowedValueRange::new(0, 100)),
        )
        .with_event_details(StateVariableEventDetails::default().with_minimum_delta(5))
    }

    #[test]
    fn test_range_swaps_inverted_bounds() {
        let range = AllowedValueRange::new(100, 0);
        assert_eq!(range.minimum(), 0);
        assert_eq!(range.maximum(), 100);
        assert!(range.is_in_range(50));
        assert!(!range.is_in_range(101));
    }

    #[test]
    fn test_arguments_bound_to_related_state_variable() {
        let service = LocalService::new(
            Udn::new("uuid:render-1"),
            ServiceType::upnp("RenderingControl", 1),
            ServiceId::upnp("RenderingControl"),
            vec![volume()],
            vec![Action::new(
                "SetVolume",
                vec![ActionArgument::input("DesiredVolume", "Volume")],
            )],
        )
        .unwrap();

        let action = service.action("SetVolume").unwrap();
        let arg = action.input_argument("DesiredVolume").unwrap();
        assert_eq!(arg.datatype(), Datatype::Ui2);
        assert!(arg.type_details().allowed_value_range().is_some());
    }

    #[test]
    fn test_unknown_related_state_variable() {
        let result = LocalService::new(
            Udn::new("uuid:render-1"),
            ServiceType::upnp("RenderingControl", 1),
            ServiceId::upnp("RenderingControl"),
            vec![volume()],
            vec![Action::new(
                "SetMute",
                vec![ActionArgument::input("DesiredMute", "Mute")],
            )],
        );
        assert!(matches!(
            result,
            Err(ModelError::UnknownStateVariable { .. })
        ));
    }

    #[test]
    fn test_moderated_numeric_type() {
        assert!(volume().is_moderated_numeric_type());
        let name = StateVariable::new("Name", StateVariableTypeDetails::new(Datatype::String))
            .with_event_details(StateVariableEventDetails::default().with_minimum_delta(5));
        assert!(!name.is_moderated_numeric_type());
    }

    #[test]
    fn test_type_details_validation() {
        let details = volume().type_details().clone();
        assert!(details.validate(&Value::Unsigned(42)).is_ok());
        assert!(details.validate(&Value::Unsigned(101)).is_err());
        assert!(details.validate(&Value::String("42".into())).is_err());

        let modes = StateVariableTypeDetails::new(Datatype::String)
            .with_allowed_values(["NORMAL", "SHUFFLE"]);
        assert!(modes.validate(&Value::from("SHUFFLE")).is_ok());
        assert!(modes.validate(&Value::from("REPEAT")).is_err());
    }

    #[test]
    fn test_remote_event_subscription_url() {
        let service = RemoteService::new(
            Udn::new("uuid:RINCON_1"),
            ServiceType::upnp("AVTransport", 1),
            ServiceId::upnp("AVTransport"),
            Url::parse("http://192.168.1.100:1400/xml/device_description.xml").unwrap(),
            "/MediaRenderer/AVTransport/Control",
            "/MediaRenderer/AVTransport/Event",
            vec![],
            vec![],
        )
        .unwrap();
        assert_eq!(
            service.event_subscription_url().unwrap().as_str(),
            "http://192.168.1.100:1400/MediaRenderer/AVTransport/Event"
        );
        assert_eq!(service.service_id().to_string(), "urn:upnp-org:serviceId:AVTransport");
    }
}
