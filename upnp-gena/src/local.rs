//! Subscriptions held by remote control points on a hosted service.
//!
//! A [`LocalGenaSubscription`] listens to the evented state of its service,
//! filters every change batch through the moderation rules of the state
//! variables, and hands the surviving values to a
//! [`LocalSubscriptionHandler`] for delivery. All work on one subscription is
//! serialized by its own lock; different subscriptions never share state.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use url::Url;
use uuid::Uuid;
use upnp_model::{
    Clock, ListenerId, LocalService, PropertyChangeListener, Service, StateEventSource,
    StateVariableValue, SystemClock, UnsignedIntegerFourBytes,
};

use crate::error::{GenaError, Result};
use crate::subscription::{CancelReason, GenaSubscription, SubscriptionPhase};

/// Delivery side of a local subscription.
///
/// Callbacks run while the subscription lock is held and receive the
/// subscription state directly. They must not call back into the owning
/// [`LocalGenaSubscription`].
pub trait LocalSubscriptionHandler: Send + Sync {
    /// The subscription was confirmed to the subscriber.
    fn established(&self, _subscription: &mut LocalSubscriptionState) {}

    /// New values are waiting in `current_values`. Implementations send the
    /// event with the current sequence and then call `increment_sequence`.
    fn event_received(&self, subscription: &mut LocalSubscriptionState);

    /// The subscription ended; `reason` is `None` for a regular unsubscribe.
    fn ended(&self, _subscription: &mut LocalSubscriptionState, _reason: Option<CancelReason>) {}
}

/// State of a local subscription, guarded by the subscription lock.
#[derive(Debug)]
pub struct LocalSubscriptionState {
    base: GenaSubscription<LocalService>,
    callback_urls: Vec<Url>,
    last_sent_timestamp: HashMap<String, u64>,
    last_sent_numeric_value: HashMap<String, i128>,
}

impl Deref for LocalSubscriptionState {
    type Target = GenaSubscription<LocalService>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for LocalSubscriptionState {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl LocalSubscriptionState {
    fn new(
        service: Arc<LocalService>,
        requested_duration_seconds: Option<u32>,
        callback_urls: Vec<Url>,
        initial_values: Vec<StateVariableValue>,
        clock: &dyn Clock,
    ) -> Self {
        let mut base = GenaSubscription::new(service, requested_duration_seconds, clock);
        base.set_subscription_id(format!("uuid:{}", Uuid::new_v4()));
        base.set_current_sequence(UnsignedIntegerFourBytes::new(0));

        let mut state = Self {
            base,
            callback_urls,
            last_sent_timestamp: HashMap::new(),
            last_sent_numeric_value: HashMap::new(),
        };

        // The initial event carries the full snapshot, so every value counts
        // as sent now.
        let now = clock.now_millis();
        for value in &initial_values {
            state.record_sent(value, now);
        }
        state.base.replace_current_values(initial_values);
        state
    }

    pub fn callback_urls(&self) -> &[Url] {
        &self.callback_urls
    }

    /// Names of the values in `values` that must not be sent at `now_millis`.
    ///
    /// A numeric variable with a minimum delta is excluded whenever
    /// `|new - last sent| < minimum delta`, which includes an unchanged value.
    pub fn moderate_state_variables(
        &self,
        now_millis: u64,
        values: &[StateVariableValue],
    ) -> HashSet<String> {
        let mut excluded = HashSet::new();

        for value in values {
            let name = value.name();
            let Some(state_variable) = self.base.service().state_variable(name) else {
                continue;
            };
            let details = state_variable.event_details();
            if details.maximum_rate_millis == 0 && details.minimum_delta == 0 {
                continue;
            }

            let Some(last_sent) = self.last_sent_timestamp.get(name) else {
                continue;
            };

            if details.maximum_rate_millis > 0
                && now_millis <= last_sent + details.maximum_rate_millis as u64
            {
                trace!("Excluding state variable with maximum rate: {}", name);
                excluded.insert(name.to_string());
                continue;
            }

            if state_variable.is_moderated_numeric_type() {
                if let (Some(old), Some(new)) =
                    (self.last_sent_numeric_value.get(name), value.as_integer())
                {
                    let min_delta = details.minimum_delta as i128;
                    if (new - old).abs() < min_delta {
                        trace!("Excluding state variable with minimum delta: {}", name);
                        excluded.insert(name.to_string());
                    }
                }
            }
        }

        excluded
    }

    /// Replace the current values with the moderated subset of `values`.
    /// Returns whether anything is left to send.
    pub(crate) fn apply_state_change(&mut self, now_millis: u64, values: &[StateVariableValue]) -> bool {
        let excluded = self.moderate_state_variables(now_millis, values);

        let mut accepted = Vec::with_capacity(values.len());
        for value in values {
            if excluded.contains(value.name()) {
                continue;
            }
            self.record_sent(value, now_millis);
            accepted.push(value.clone());
        }

        self.base.replace_current_values(accepted);
        !self.base.current_values().is_empty()
    }

    fn record_sent(&mut self, value: &StateVariableValue, now_millis: u64) {
        let name = value.name();
        self.last_sent_timestamp.insert(name.to_string(), now_millis);

        let moderated = self
            .base
            .service()
            .state_variable(name)
            .map(|sv| sv.is_moderated_numeric_type())
            .unwrap_or(false);
        if moderated {
            if let Some(n) = value.as_integer() {
                self.last_sent_numeric_value.insert(name.to_string(), n);
            }
        }
    }

    pub(crate) fn set_subscription_duration(&mut self, requested_duration_seconds: Option<u32>) {
        self.base.set_requested_duration_seconds(requested_duration_seconds);
        let requested = self.base.requested_duration_seconds();
        self.base.set_actual_duration_seconds(requested);
    }
}

/// Builder for [`LocalGenaSubscription`].
pub struct LocalGenaSubscriptionBuilder {
    source: Arc<dyn StateEventSource>,
    handler: Arc<dyn LocalSubscriptionHandler>,
    requested_duration_seconds: Option<u32>,
    callback_urls: Vec<Url>,
    clock: Arc<dyn Clock>,
}

impl LocalGenaSubscriptionBuilder {
    pub fn requested_duration_seconds(mut self, seconds: Option<u32>) -> Self {
        self.requested_duration_seconds = seconds;
        self
    }

    pub fn callback_urls(mut self, urls: Vec<Url>) -> Self {
        self.callback_urls = urls;
        self
    }

    pub fn callback_url(mut self, url: Url) -> Self {
        self.callback_urls.push(url);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the subscription, reading the current evented state of the
    /// service. The subscription is not yet listening for changes, see
    /// [`LocalGenaSubscription::register_on_service`].
    pub fn build(self) -> Result<Arc<LocalGenaSubscription>> {
        let initial_values = self.source.current_state().map_err(GenaError::InitialState)?;
        let state = LocalSubscriptionState::new(
            Arc::clone(self.source.service()),
            self.requested_duration_seconds,
            self.callback_urls,
            initial_values,
            self.clock.as_ref(),
        );
        debug!(
            sid = state.subscription_id().unwrap_or_default(),
            "Created local subscription on {}",
            state.service().service_id()
        );

        Ok(Arc::new(LocalGenaSubscription {
            state: Mutex::new(state),
            source: self.source,
            handler: self.handler,
            clock: self.clock,
            listener: Mutex::new(None),
        }))
    }
}

/// A subscription of a remote control point on a hosted service.
pub struct LocalGenaSubscription {
    state: Mutex<LocalSubscriptionState>,
    source: Arc<dyn StateEventSource>,
    handler: Arc<dyn LocalSubscriptionHandler>,
    clock: Arc<dyn Clock>,
    listener: Mutex<Option<ListenerId>>,
}

impl LocalGenaSubscription {
    pub fn builder(
        source: Arc<dyn StateEventSource>,
        handler: Arc<dyn LocalSubscriptionHandler>,
    ) -> LocalGenaSubscriptionBuilder {
        LocalGenaSubscriptionBuilder {
            source,
            handler,
            requested_duration_seconds: None,
            callback_urls: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Start listening for evented state changes of the service.
    pub fn register_on_service(self: &Arc<Self>) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let adapter = Arc::new(SubscriptionListener(Arc::downgrade(self)));
        *listener = Some(self.source.add_listener(adapter));
    }

    /// Confirm the subscription to the subscriber.
    pub fn establish(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.transition(SubscriptionPhase::Established)?;
        state.stamp_last_refresh(self.clock.as_ref());
        self.handler.established(&mut state);
        Ok(())
    }

    /// Renew with a new requested duration, `None` for the default.
    pub fn renew(&self, requested_duration_seconds: Option<u32>) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase() != SubscriptionPhase::Established {
            return Err(GenaError::InvalidTransition {
                from: state.phase(),
                to: SubscriptionPhase::Established,
            });
        }
        state.set_subscription_duration(requested_duration_seconds);
        state.stamp_last_refresh(self.clock.as_ref());
        Ok(())
    }

    /// Set the requested duration, `None` for the default. The actual
    /// duration follows the requested one.
    pub fn set_subscription_duration(&self, requested_duration_seconds: Option<u32>) {
        self.state.lock().set_subscription_duration(requested_duration_seconds);
    }

    /// Stop listening and end the subscription. `None` is a regular
    /// unsubscribe; ending twice is a no-op.
    pub fn end(&self, reason: Option<CancelReason>) {
        if let Some(id) = self.listener.lock().take() {
            if !self.source.remove_listener(id) {
                warn!("Subscription listener was already removed from the service");
            }
        }

        let mut state = self.state.lock();
        if state.phase().is_terminal() {
            debug!("Subscription already ended: {:?}", state.subscription_id());
            return;
        }
        if let Err(e) = state.transition(CancelReason::terminal_phase(reason)) {
            warn!("Failed to end subscription: {}", e);
            return;
        }
        debug!(sid = state.subscription_id().unwrap_or_default(), ?reason, "Local subscription ended");
        self.handler.ended(&mut state, reason);
    }

    /// Whether the subscriber failed to renew within the actual duration.
    pub fn has_expired(&self) -> bool {
        self.state.lock().has_expired(false, self.clock.as_ref())
    }

    /// Seconds the subscriber has left to renew, negative once expired.
    pub fn seconds_until_expiration(&self) -> i64 {
        self.state.lock().seconds_until_expiration(self.clock.as_ref())
    }

    /// Apply one batch of evented state changes.
    pub fn handle_state_change(&self, values: &[StateVariableValue]) {
        let mut state = self.state.lock();
        if !state.phase().accepts_events() {
            trace!("Ignoring state change on ended subscription");
            return;
        }
        let now = self.clock.now_millis();
        if state.apply_state_change(now, values) {
            self.handler.event_received(&mut state);
        } else {
            trace!("All changed state variables were moderated, no event");
        }
    }

    pub fn subscription_id(&self) -> String {
        self.state
            .lock()
            .subscription_id()
            .unwrap_or_default()
            .to_string()
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.state.lock().phase()
    }

    pub fn current_sequence(&self) -> Option<UnsignedIntegerFourBytes> {
        self.state.lock().current_sequence()
    }

    pub fn is_registered(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Run `f` with the subscription state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut LocalSubscriptionState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

struct SubscriptionListener(Weak<LocalGenaSubscription>);

impl PropertyChangeListener for SubscriptionListener {
    fn evented_state_changed(&self, values: &[StateVariableValue]) {
        if let Some(subscription) = self.0.upgrade() {
            subscription.handle_state_change(values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use upnp_model::{
        Datatype, ExecutionError, ManualClock, ServiceId, ServiceType, StateVariable,
        StateVariableEventDetails, StateVariableTypeDetails, Udn, Value,
    };

    struct FixedSource {
        service: Arc<LocalService>,
        values: Vec<StateVariableValue>,
    }

    impl StateEventSource for FixedSource {
        fn service(&self) -> &Arc<LocalService> {
            &self.service
        }

        fn current_state(&self) -> std::result::Result<Vec<StateVariableValue>, ExecutionError> {
            Ok(self.values.clone())
        }

        fn add_listener(&self, _listener: Arc<dyn PropertyChangeListener>) -> ListenerId {
            unreachable!("not registered in unit tests")
        }

        fn remove_listener(&self, _id: ListenerId) -> bool {
            false
        }
    }

    struct Ignore;

    impl LocalSubscriptionHandler for Ignore {
        fn event_received(&self, _subscription: &mut LocalSubscriptionState) {}
    }

    fn service() -> Arc<LocalService> {
        Arc::new(
            LocalService::new(
                Udn::new("uuid:dimmer"),
                ServiceType::upnp("Dimming", 1),
                ServiceId::upnp("Dimming"),
                vec![
                    StateVariable::new("LoadLevelStatus", StateVariableTypeDetails::new(Datatype::Ui1))
                        .with_event_details(StateVariableEventDetails::default().with_minimum_delta(5)),
                    StateVariable::new("StepDelta", StateVariableTypeDetails::new(Datatype::Ui1))
                        .with_event_details(
                            StateVariableEventDetails::default().with_maximum_rate_millis(1000),
                        ),
                    StateVariable::new("Label", StateVariableTypeDetails::new(Datatype::String)),
                ],
                vec![],
            )
            .unwrap(),
        )
    }

    fn value(name: &str, n: u64) -> StateVariableValue {
        StateVariableValue::new(name, Some(Value::Unsigned(n)))
    }

    fn state(initial: Vec<StateVariableValue>) -> LocalSubscriptionState {
        LocalSubscriptionState::new(service(), None, vec![], initial, &ManualClock::new(0))
    }

    #[rstest]
    #[case(13, true)]
    #[case(7, true)]
    #[case(10, true)]
    #[case(16, false)]
    #[case(4, false)]
    #[case(15, false)]
    fn test_minimum_delta(#[case] new_value: u64, #[case] excluded: bool) {
        let state = state(vec![value("LoadLevelStatus", 10)]);
        let result = state.moderate_state_variables(10, &[value("LoadLevelStatus", new_value)]);
        assert_eq!(result.contains("LoadLevelStatus"), excluded);
    }

    #[test]
    fn test_unchanged_numeric_value_is_excluded() {
        let mut state = state(vec![value("LoadLevelStatus", 10)]);
        assert!(!state.apply_state_change(10, &[value("LoadLevelStatus", 10)]));
        assert!(state.apply_state_change(20, &[value("LoadLevelStatus", 15)]));
        assert!(!state.apply_state_change(30, &[value("LoadLevelStatus", 15)]));
    }

    #[rstest]
    #[case(500, true)]
    #[case(1000, true)]
    #[case(1001, false)]
    #[case(1100, false)]
    fn test_maximum_rate(#[case] now: u64, #[case] excluded: bool) {
        let state = state(vec![value("StepDelta", 1)]);
        let result = state.moderate_state_variables(now, &[value("StepDelta", 2)]);
        assert_eq!(result.contains("StepDelta"), excluded);
    }

    #[test]
    fn test_never_sent_variable_is_not_moderated() {
        let state = state(vec![]);
        let result = state.moderate_state_variables(1, &[value("StepDelta", 2), value("LoadLevelStatus", 11)]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_apply_resets_rate_baseline() {
        let mut state = state(vec![value("StepDelta", 1)]);
        assert!(state.apply_state_change(1100, &[value("StepDelta", 2)]));
        assert!(!state.apply_state_change(1500, &[value("StepDelta", 3)]));
        assert!(state.current_values().is_empty());
        assert!(state.apply_state_change(2101, &[value("StepDelta", 4)]));
    }

    #[test]
    fn test_apply_keeps_only_unexcluded_values() {
        let mut state = state(vec![value("LoadLevelStatus", 10)]);
        let label = StateVariableValue::new("Label", Some("Kitchen".into()));
        assert!(state.apply_state_change(5, &[value("LoadLevelStatus", 12), label]));
        assert_eq!(state.current_values().len(), 1);
        assert!(state.current_value("Label").is_some());
    }

    #[test]
    fn test_initial_state_and_identity() {
        let source = Arc::new(FixedSource {
            service: service(),
            values: vec![value("LoadLevelStatus", 10), value("StepDelta", 1)],
        });
        let subscription = LocalGenaSubscription::builder(source, Arc::new(Ignore))
            .requested_duration_seconds(Some(300))
            .build()
            .unwrap();

        assert!(subscription.subscription_id().starts_with("uuid:"));
        assert_eq!(subscription.current_sequence(), Some(UnsignedIntegerFourBytes::new(0)));
        assert_eq!(subscription.phase(), SubscriptionPhase::Created);
        subscription.with_state(|s| {
            assert_eq!(s.current_values().len(), 2);
            assert_eq!(s.actual_duration_seconds(), 300);
        });

        subscription.set_subscription_duration(None);
        subscription.with_state(|s| assert_eq!(s.actual_duration_seconds(), 1800));
    }
}
