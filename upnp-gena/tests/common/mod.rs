//! Shared fixtures for subscription integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use upnp_gena::{
    CancelReason, GenaSubscription, LocalSubscriptionHandler, LocalSubscriptionState,
    RemoteSubscriptionCallback,
};
use upnp_model::{
    ChangeNotifier, Datatype, DefaultServiceManager, LocalService, RemoteService, ServiceId,
    ServiceType, StateVariable, StateVariableAccessor, StateVariableEventDetails,
    StateVariableTypeDetails, Udn, UnsupportedDataError, UpnpResponse,
};

/// Minimal dimmable light used as a hosted service implementation.
pub struct Dimmer {
    pub level: u32,
    pub label: String,
    notifier: ChangeNotifier,
}

impl Dimmer {
    pub fn set_level(&mut self, level: u32) {
        self.level = level;
        self.notifier.changed("LoadLevelStatus");
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
        self.notifier.changed("Label");
    }
}

pub fn dimming_service(min_delta: u32, max_rate_millis: u32) -> Arc<LocalService> {
    Arc::new(
        LocalService::new(
            Udn::new("uuid:dimmer-1"),
            ServiceType::upnp("Dimming", 1),
            ServiceId::upnp("Dimming"),
            vec![
                StateVariable::new("LoadLevelStatus", StateVariableTypeDetails::new(Datatype::Ui1))
                    .with_event_details(
                        StateVariableEventDetails::default()
                            .with_minimum_delta(min_delta)
                            .with_maximum_rate_millis(max_rate_millis),
                    ),
                StateVariable::new("Label", StateVariableTypeDetails::new(Datatype::String)),
            ],
            vec![],
        )
        .unwrap(),
    )
}

pub fn dimmer_manager(service: Arc<LocalService>) -> Arc<DefaultServiceManager<Dimmer>> {
    Arc::new(
        DefaultServiceManager::new(service, |notifier| {
            Ok(Dimmer {
                level: 10,
                label: "Hall".to_string(),
                notifier,
            })
        })
        .with_accessor("LoadLevelStatus", StateVariableAccessor::getter(|d: &Dimmer| d.level))
        .with_accessor("Label", StateVariableAccessor::getter(|d: &Dimmer| d.label.clone())),
    )
}

/// Records what a local subscription delivered, advancing the sequence like
/// an event sender would.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<(u32, Vec<(String, String)>)>>,
    pub established: Mutex<u32>,
    pub ended: Mutex<Vec<Option<CancelReason>>>,
}

impl LocalSubscriptionHandler for RecordingHandler {
    fn established(&self, _subscription: &mut LocalSubscriptionState) {
        *self.established.lock() += 1;
    }

    fn event_received(&self, subscription: &mut LocalSubscriptionState) {
        let sequence = subscription.current_sequence().map(|s| s.value()).unwrap_or(0);
        let mut values: Vec<(String, String)> = subscription
            .current_values()
            .values()
            .map(|v| (v.name().to_string(), v.to_wire_string()))
            .collect();
        values.sort();
        self.events.lock().push((sequence, values));
        subscription.increment_sequence();
    }

    fn ended(&self, _subscription: &mut LocalSubscriptionState, reason: Option<CancelReason>) {
        self.ended.lock().push(reason);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Established,
    Failed(Option<UpnpResponse>),
    Ended(Option<CancelReason>),
    Received(u32),
    Missed(u32),
    Invalid(String),
}

#[derive(Default)]
pub struct RecordingCallback {
    pub events: Mutex<Vec<RemoteEvent>>,
}

impl RecordingCallback {
    pub fn take(&self) -> Vec<RemoteEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl RemoteSubscriptionCallback for RecordingCallback {
    fn established(&self, _subscription: &GenaSubscription<RemoteService>) {
        self.events.lock().push(RemoteEvent::Established);
    }

    fn failed(&self, _subscription: &GenaSubscription<RemoteService>, response: Option<UpnpResponse>) {
        self.events.lock().push(RemoteEvent::Failed(response));
    }

    fn ended(
        &self,
        _subscription: &GenaSubscription<RemoteService>,
        reason: Option<CancelReason>,
        _response: Option<UpnpResponse>,
    ) {
        self.events.lock().push(RemoteEvent::Ended(reason));
    }

    fn event_received(&self, subscription: &GenaSubscription<RemoteService>) {
        let sequence = subscription.current_sequence().map(|s| s.value()).unwrap_or(0);
        self.events.lock().push(RemoteEvent::Received(sequence));
    }

    fn events_missed(&self, _subscription: &GenaSubscription<RemoteService>, number_of_missed_events: u32) {
        self.events.lock().push(RemoteEvent::Missed(number_of_missed_events));
    }

    fn invalid_message(&self, _subscription: &GenaSubscription<RemoteService>, error: UnsupportedDataError) {
        self.events.lock().push(RemoteEvent::Invalid(error.message().to_string()));
    }
}

pub fn remote_service() -> Arc<RemoteService> {
    Arc::new(
        RemoteService::new(
            Udn::new("uuid:RINCON_1"),
            ServiceType::upnp("AVTransport", 1),
            ServiceId::upnp("AVTransport"),
            url::Url::parse("http://192.168.1.100:1400/xml/device_description.xml").unwrap(),
            "/MediaRenderer/AVTransport/Control",
            "/MediaRenderer/AVTransport/Event",
            vec![],
            vec![],
        )
        .unwrap(),
    )
}
