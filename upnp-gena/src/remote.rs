//! Subscriptions this stack holds on services of discovered devices.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use url::Url;
use upnp_model::{
    Clock, Namespace, NetworkAddress, RemoteService, StateVariableValue, SystemClock,
    UnsignedIntegerFourBytes, UnsupportedDataError, UpnpResponse,
};

use crate::error::{GenaError, Result};
use crate::subscription::{CancelReason, GenaSubscription, SubscriptionPhase};

/// Lifecycle and event callbacks of a remote subscription.
///
/// Callbacks run while the subscription lock is held, in the order events
/// were accepted.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteSubscriptionCallback: Send + Sync {
    fn established(&self, subscription: &GenaSubscription<RemoteService>);

    /// Initial subscribe failed; `response` is the device's answer if one
    /// was received.
    fn failed(&self, subscription: &GenaSubscription<RemoteService>, response: Option<UpnpResponse>);

    fn ended(
        &self,
        subscription: &GenaSubscription<RemoteService>,
        reason: Option<CancelReason>,
        response: Option<UpnpResponse>,
    );

    fn event_received(&self, subscription: &GenaSubscription<RemoteService>);

    /// Events were lost between the previous and the current sequence.
    fn events_missed(&self, subscription: &GenaSubscription<RemoteService>, number_of_missed_events: u32);

    fn invalid_message(&self, subscription: &GenaSubscription<RemoteService>, error: UnsupportedDataError);
}

/// An outgoing subscription to a remote service.
pub struct RemoteGenaSubscription {
    state: Mutex<GenaSubscription<RemoteService>>,
    callback: Arc<dyn RemoteSubscriptionCallback>,
    clock: Arc<dyn Clock>,
}

impl RemoteGenaSubscription {
    pub fn new(
        service: Arc<RemoteService>,
        requested_duration_seconds: Option<u32>,
        callback: Arc<dyn RemoteSubscriptionCallback>,
    ) -> Self {
        Self::with_clock(service, requested_duration_seconds, callback, Arc::new(SystemClock))
    }

    pub fn with_clock(
        service: Arc<RemoteService>,
        requested_duration_seconds: Option<u32>,
        callback: Arc<dyn RemoteSubscriptionCallback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = GenaSubscription::new(service, requested_duration_seconds, clock.as_ref());
        Self {
            state: Mutex::new(state),
            callback,
            clock,
        }
    }

    /// Where SUBSCRIBE requests for this service are sent.
    pub fn event_subscription_url(&self) -> Result<Url> {
        Ok(self.state.lock().service().event_subscription_url()?)
    }

    /// One callback URL per active local stream server.
    pub fn event_callback_urls(
        &self,
        active_stream_servers: &[NetworkAddress],
        namespace: &Namespace,
    ) -> Result<Vec<Url>> {
        let state = self.state.lock();
        let service = state.service();
        active_stream_servers
            .iter()
            .map(|address| {
                namespace
                    .event_callback_url(address, service.as_ref())
                    .map_err(GenaError::from)
            })
            .collect()
    }

    /// The device accepted the subscription.
    pub fn establish(&self, subscription_id: impl Into<String>, actual_duration_seconds: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.transition(SubscriptionPhase::Established)?;
        state.set_subscription_id(subscription_id);
        state.set_actual_duration_seconds(actual_duration_seconds);
        state.stamp_last_refresh(self.clock.as_ref());
        debug!(
            sid = state.subscription_id().unwrap_or_default(),
            actual_duration_seconds, "Remote subscription established"
        );
        self.callback.established(&state);
        Ok(())
    }

    /// The device accepted a renewal.
    pub fn renewed(&self, actual_duration_seconds: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase() != SubscriptionPhase::Established {
            return Err(GenaError::InvalidTransition {
                from: state.phase(),
                to: SubscriptionPhase::Established,
            });
        }
        state.set_actual_duration_seconds(actual_duration_seconds);
        state.stamp_last_refresh(self.clock.as_ref());
        state.reset_renew_attempts();
        Ok(())
    }

    /// A renewal request is about to be sent. Returns the number of attempts
    /// since the last successful refresh, including this one.
    pub fn renewal_started(&self) -> u32 {
        let mut state = self.state.lock();
        let attempts = state.record_renew_attempt();
        trace!(sid = state.subscription_id().unwrap_or_default(), attempts, "Renewing remote subscription");
        attempts
    }

    /// Subscribing failed. Ignored once the subscription is terminal.
    pub fn fail(&self, response: Option<UpnpResponse>) {
        let mut state = self.state.lock();
        if let Err(e) = state.transition(SubscriptionPhase::Failed) {
            debug!("Ignoring failure of finished subscription: {}", e);
            return;
        }
        warn!(?response, "Remote subscription failed");
        self.callback.failed(&state, response);
    }

    /// The subscription ended; `reason` is `None` after a regular
    /// unsubscribe. A failed renewal moves to `Failed`, still reported
    /// through `ended`. Ignored once the subscription is terminal.
    pub fn end(&self, reason: Option<CancelReason>, response: Option<UpnpResponse>) {
        let mut state = self.state.lock();
        if let Err(e) = state.transition(CancelReason::terminal_phase(reason)) {
            debug!("Ignoring end of finished subscription: {}", e);
            return;
        }
        debug!(sid = state.subscription_id().unwrap_or_default(), ?reason, "Remote subscription ended");
        self.callback.ended(&state, reason, response);
    }

    /// Apply an event notification.
    ///
    /// Sequences at or below the current one are dropped, except for the
    /// rollover from the maximum to 1. A jump ahead reports the number of
    /// missed events before the values are merged.
    pub fn receive(&self, sequence: UnsignedIntegerFourBytes, values: Vec<StateVariableValue>) {
        let mut state = self.state.lock();
        if !state.phase().accepts_events() {
            trace!("Dropping event {} for finished subscription", sequence);
            return;
        }

        if let Some(current) = state.current_sequence() {
            let rollover = current.is_max() && sequence.value() == 1;
            if !rollover {
                if sequence <= current {
                    trace!("Dropping event {} at or below current sequence {}", sequence, current);
                    return;
                }
                let expected = current.value() as u64 + 1;
                let missed = sequence.value() as u64 - expected;
                if missed != 0 {
                    debug!("Missed {} events before sequence {}", missed, sequence);
                    self.callback.events_missed(&state, missed as u32);
                }
            }
        }

        state.set_current_sequence(sequence);
        state.merge_current_values(values);
        self.callback.event_received(&state);
    }

    /// An event notification could not be read.
    pub fn invalid_message(&self, error: UnsupportedDataError) {
        let state = self.state.lock();
        warn!("Invalid event message: {}", error);
        self.callback.invalid_message(&state, error);
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.state.lock().subscription_id().map(str::to_string)
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.state.lock().phase()
    }

    pub fn current_sequence(&self) -> Option<UnsignedIntegerFourBytes> {
        self.state.lock().current_sequence()
    }

    pub fn requested_duration_seconds(&self) -> u32 {
        self.state.lock().requested_duration_seconds()
    }

    pub fn actual_duration_seconds(&self) -> u32 {
        self.state.lock().actual_duration_seconds()
    }

    /// Whether half the actual duration has passed since the last refresh.
    pub fn needs_renewal(&self) -> bool {
        self.state.lock().has_expired(true, self.clock.as_ref())
    }

    pub fn has_expired(&self) -> bool {
        self.state.lock().has_expired(false, self.clock.as_ref())
    }

    pub fn seconds_until_expiration(&self) -> i64 {
        self.state.lock().seconds_until_expiration(self.clock.as_ref())
    }

    pub fn renew_attempts(&self) -> u32 {
        self.state.lock().renew_attempts()
    }

    /// Run `f` with the subscription state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&GenaSubscription<RemoteService>) -> R) -> R {
        f(&self.state.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use upnp_model::{ServiceId, ServiceType, Udn};

    fn service() -> Arc<RemoteService> {
        Arc::new(
            RemoteService::new(
                Udn::new("uuid:RINCON_000E58A0123401400"),
                ServiceType::upnp("RenderingControl", 1),
                ServiceId::upnp("RenderingControl"),
                Url::parse("http://192.168.1.100:1400/xml/device_description.xml").unwrap(),
                "/MediaRenderer/RenderingControl/Control",
                "/MediaRenderer/RenderingControl/Event",
                vec![],
                vec![],
            )
            .unwrap(),
        )
    }

    fn seq(n: u32) -> UnsignedIntegerFourBytes {
        UnsignedIntegerFourBytes::new(n)
    }

    #[test]
    fn test_gap_reports_missed_events() {
        let mut callback = MockRemoteSubscriptionCallback::new();
        callback.expect_event_received().times(4).return_const(());
        callback
            .expect_events_missed()
            .withf(|_, missed| *missed == 2)
            .times(1)
            .return_const(());

        let subscription = RemoteGenaSubscription::new(service(), None, Arc::new(callback));
        for n in [0, 1, 2, 5] {
            subscription.receive(seq(n), vec![]);
        }
        assert_eq!(subscription.current_sequence(), Some(seq(5)));
    }

    #[test]
    fn test_out_of_order_event_is_dropped() {
        let mut callback = MockRemoteSubscriptionCallback::new();
        callback.expect_event_received().times(1).return_const(());
        callback.expect_events_missed().never();

        let subscription = RemoteGenaSubscription::new(service(), None, Arc::new(callback));
        subscription.receive(seq(5), vec![StateVariableValue::new("Volume", Some(10u32.into()))]);
        subscription.receive(seq(2), vec![StateVariableValue::new("Volume", Some(99u32.into()))]);

        assert_eq!(subscription.current_sequence(), Some(seq(5)));
        subscription.with_state(|s| {
            assert_eq!(s.current_value("Volume").unwrap().to_wire_string(), "10");
        });
    }

    #[test]
    fn test_rollover_to_one_is_continuation() {
        let mut callback = MockRemoteSubscriptionCallback::new();
        callback.expect_event_received().times(2).return_const(());
        callback.expect_events_missed().never();

        let subscription = RemoteGenaSubscription::new(service(), None, Arc::new(callback));
        subscription.receive(seq(u32::MAX), vec![]);
        subscription.receive(seq(1), vec![]);
        assert_eq!(subscription.current_sequence(), Some(seq(1)));
    }

    #[test]
    fn test_no_events_after_failed_renewal() {
        let mut callback = MockRemoteSubscriptionCallback::new();
        callback.expect_established().times(1).return_const(());
        callback
            .expect_ended()
            .withf(|_, reason, response| *reason == Some(CancelReason::RenewalFailed) && response.is_none())
            .times(1)
            .return_const(());
        callback.expect_event_received().never();

        let subscription = RemoteGenaSubscription::new(service(), Some(600), Arc::new(callback));
        subscription.establish("uuid:sub-1", 300).unwrap();
        assert_eq!(subscription.subscription_id().as_deref(), Some("uuid:sub-1"));
        assert_eq!(subscription.actual_duration_seconds(), 300);

        assert_eq!(subscription.renewal_started(), 1);
        subscription.end(Some(CancelReason::RenewalFailed), None);
        subscription.end(None, None);
        subscription.receive(seq(0), vec![]);
        assert_eq!(subscription.phase(), SubscriptionPhase::Failed);
        assert_eq!(subscription.renew_attempts(), 1);
    }

    #[test]
    fn test_failure_carries_response() {
        let mut callback = MockRemoteSubscriptionCallback::new();
        callback
            .expect_failed()
            .with(mockall::predicate::always(), eq(Some(UpnpResponse::new(412, "Precondition Failed"))))
            .times(1)
            .return_const(());

        let subscription = RemoteGenaSubscription::new(service(), None, Arc::new(callback));
        subscription.fail(Some(UpnpResponse::new(412, "Precondition Failed")));
        subscription.fail(None);
        assert_eq!(subscription.phase(), SubscriptionPhase::Failed);
        assert!(subscription.establish("uuid:late", 300).is_err());
    }

    #[test]
    fn test_event_urls() {
        let callback = MockRemoteSubscriptionCallback::new();
        let subscription = RemoteGenaSubscription::new(service(), None, Arc::new(callback));
        assert_eq!(
            subscription.event_subscription_url().unwrap().as_str(),
            "http://192.168.1.100:1400/MediaRenderer/RenderingControl/Event"
        );

        let servers = vec![NetworkAddress::new(
            "en0",
            "192.168.1.50".parse().unwrap(),
            3400,
        )];
        let urls = subscription
            .event_callback_urls(&servers, &Namespace::default())
            .unwrap();
        assert_eq!(
            urls[0].as_str(),
            "http://192.168.1.50:3400/dev/RINCON_000E58A0123401400/svc/upnp-org/RenderingControl/event/cb"
        );
    }
}
