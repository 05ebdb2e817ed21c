//! A SwitchPower service wired to method executors.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use upnp_control::{
    ActionExecutor, ActionMethod, MethodActionExecutor, MethodResult, OutputAccessor,
    ParameterKind, QueryStateVariableExecutor,
};
use upnp_model::{
    Action, ActionArgument, ChangeNotifier, Datatype, DefaultServiceManager, ExecutionError,
    LocalService, ServiceId, ServiceManager, ServiceType, StateVariable, StateVariableAccessor,
    StateVariableEventDetails, StateVariableTypeDetails, Udn,
};

pub struct SwitchPower {
    pub target: bool,
    pub status: bool,
    pub last_user_agent: Option<String>,
    notifier: ChangeNotifier,
}

impl SwitchPower {
    fn set_target(&mut self, value: bool) {
        self.target = value;
        self.status = value;
        self.notifier.changed("Status");
    }
}

/// Returned by `GetInfo`, read through output accessors.
pub struct SwitchInfo {
    pub status: bool,
    pub target: bool,
}

pub fn switch_power_service() -> Arc<LocalService> {
    let boolean = || StateVariableTypeDetails::new(Datatype::Boolean);
    Arc::new(
        LocalService::new(
            Udn::new("uuid:switch-1"),
            ServiceType::upnp("SwitchPower", 1),
            ServiceId::upnp("SwitchPower"),
            vec![
                StateVariable::new("Target", boolean())
                    .with_event_details(StateVariableEventDetails::not_evented()),
                StateVariable::new("Status", boolean()),
            ],
            vec![
                Action::new("SetTarget", vec![ActionArgument::input("NewTargetValue", "Target")]),
                Action::new("GetTarget", vec![ActionArgument::output("RetTargetValue", "Target")]),
                Action::new("GetStatus", vec![ActionArgument::output("ResultStatus", "Status")]),
                Action::new(
                    "GetInfo",
                    vec![
                        ActionArgument::output("InfoStatus", "Status"),
                        ActionArgument::output("InfoTarget", "Target"),
                    ],
                ),
                Action::new(
                    "GetBoth",
                    vec![
                        ActionArgument::output("BothStatus", "Status"),
                        ActionArgument::output("BothTarget", "Target"),
                    ],
                ),
                Action::new("Toggle", vec![]),
                Action::query_state_variable(),
            ],
        )
        .unwrap(),
    )
}

pub fn switch_power_manager(lock_timeout: Duration) -> Arc<DefaultServiceManager<SwitchPower>> {
    Arc::new(
        DefaultServiceManager::new(switch_power_service(), |notifier| {
            Ok(SwitchPower {
                target: false,
                status: false,
                last_user_agent: None,
                notifier,
            })
        })
        .with_accessor("Status", StateVariableAccessor::getter(|s: &SwitchPower| s.status))
        .with_accessor("Target", StateVariableAccessor::getter(|s: &SwitchPower| s.target))
        .with_lock_timeout(lock_timeout),
    )
}

/// One executor per action, keyed by action name.
pub fn switch_power_executors(
    manager: Arc<DefaultServiceManager<SwitchPower>>,
) -> HashMap<&'static str, Box<dyn ActionExecutor>> {
    let manager: Arc<dyn ServiceManager<SwitchPower>> = manager;
    let mut executors: HashMap<&'static str, Box<dyn ActionExecutor>> = HashMap::new();

    let set_target = ActionMethod::new("set_target", |s: &mut SwitchPower, args| {
        s.set_target(args.bool(0).unwrap_or(false));
        if let Some(info) = args.client_info() {
            s.last_user_agent = info.user_agent().map(str::to_string);
        }
        Ok(MethodResult::Void)
    })
    .parameter(ParameterKind::Primitive)
    .accepts_client_info();
    executors.insert(
        "SetTarget",
        Box::new(MethodActionExecutor::new(Arc::clone(&manager), set_target)),
    );

    let get_target = ActionMethod::new("get_target", |s: &mut SwitchPower, _| {
        Ok(MethodResult::value(s.target))
    })
    .returns_value();
    executors.insert(
        "GetTarget",
        Box::new(MethodActionExecutor::new(Arc::clone(&manager), get_target)),
    );

    let get_status = ActionMethod::new("get_status", |_: &mut SwitchPower, _| Ok(MethodResult::Void));
    executors.insert(
        "GetStatus",
        Box::new(
            MethodActionExecutor::new(Arc::clone(&manager), get_status)
                .with_output_accessor("ResultStatus", OutputAccessor::getter(|s: &SwitchPower| s.status)),
        ),
    );

    let get_info = ActionMethod::new("get_info", |s: &mut SwitchPower, _| {
        Ok(MethodResult::instance(SwitchInfo {
            status: s.status,
            target: s.target,
        }))
    })
    .returns_value();
    executors.insert(
        "GetInfo",
        Box::new(
            MethodActionExecutor::new(Arc::clone(&manager), get_info)
                .with_output_accessor("InfoStatus", OutputAccessor::getter(|i: &SwitchInfo| i.status))
                .with_output_accessor("InfoTarget", OutputAccessor::getter(|i: &SwitchInfo| i.target)),
        ),
    );

    let get_both = ActionMethod::new("get_both", |s: &mut SwitchPower, _| {
        Ok(MethodResult::value(s.status))
    })
    .returns_value();
    executors.insert(
        "GetBoth",
        Box::new(MethodActionExecutor::new(Arc::clone(&manager), get_both)),
    );

    let toggle = ActionMethod::new("toggle", |_: &mut SwitchPower, _| Err(ExecutionError::Interrupted));
    executors.insert(
        "Toggle",
        Box::new(MethodActionExecutor::new(Arc::clone(&manager), toggle)),
    );

    executors.insert(
        "QueryStateVariable",
        Box::new(QueryStateVariableExecutor::new(manager)),
    );
    executors
}
