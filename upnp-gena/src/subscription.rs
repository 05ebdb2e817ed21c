//! State shared by local and remote GENA subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use upnp_model::{
    Clock, ExpirationDetails, Service, StateVariableValue, UnsignedIntegerFourBytes,
};

use crate::error::{GenaError, Result};

/// Duration used when a subscriber does not request one.
pub const DEFAULT_SUBSCRIPTION_DURATION_SECONDS: u32 = 1800;

/// Lifecycle of a subscription.
///
/// `Created -> Established -> (Ended | Expired | Failed)`. The last three are
/// terminal; no events are delivered once a subscription has left
/// `Established`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionPhase {
    Created,
    Established,
    Ended,
    Expired,
    Failed,
}

impl SubscriptionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionPhase::Ended | SubscriptionPhase::Expired | SubscriptionPhase::Failed
        )
    }

    pub fn accepts_events(&self) -> bool {
        !self.is_terminal()
    }
}

/// Why a subscription was ended without an explicit unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    RenewalFailed,
    DeviceWasRemoved,
    UnsubscribeFailed,
    Expired,
}

impl CancelReason {
    /// Phase a subscription ends in for `reason`. Renewal failure is a
    /// failure like a failed initial subscribe.
    pub fn terminal_phase(reason: Option<CancelReason>) -> SubscriptionPhase {
        match reason {
            Some(CancelReason::Expired) => SubscriptionPhase::Expired,
            Some(CancelReason::RenewalFailed) => SubscriptionPhase::Failed,
            _ => SubscriptionPhase::Ended,
        }
    }
}

/// Subscription id, durations, sequence and latest values of one GENA
/// subscription on a service of type `S`.
#[derive(Debug)]
pub struct GenaSubscription<S: Service> {
    service: Arc<S>,
    subscription_id: Option<String>,
    requested_duration_seconds: u32,
    actual_duration_seconds: u32,
    current_sequence: Option<UnsignedIntegerFourBytes>,
    current_values: HashMap<String, StateVariableValue>,
    phase: SubscriptionPhase,
    expiration: ExpirationDetails,
}

impl<S: Service> GenaSubscription<S> {
    pub(crate) fn new(service: Arc<S>, requested_duration_seconds: Option<u32>, clock: &dyn Clock) -> Self {
        let requested = requested_duration_seconds.unwrap_or(DEFAULT_SUBSCRIPTION_DURATION_SECONDS);
        Self {
            service,
            subscription_id: None,
            requested_duration_seconds: requested,
            actual_duration_seconds: requested,
            current_sequence: None,
            current_values: HashMap::new(),
            phase: SubscriptionPhase::Created,
            expiration: ExpirationDetails::new(requested, clock),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    pub(crate) fn set_subscription_id(&mut self, subscription_id: impl Into<String>) {
        self.subscription_id = Some(subscription_id.into());
    }

    pub fn requested_duration_seconds(&self) -> u32 {
        self.requested_duration_seconds
    }

    /// `None` resets the requested duration to the default.
    pub(crate) fn set_requested_duration_seconds(&mut self, seconds: Option<u32>) {
        self.requested_duration_seconds = seconds.unwrap_or(DEFAULT_SUBSCRIPTION_DURATION_SECONDS);
    }

    pub fn actual_duration_seconds(&self) -> u32 {
        self.actual_duration_seconds
    }

    pub(crate) fn set_actual_duration_seconds(&mut self, seconds: u32) {
        self.actual_duration_seconds = seconds;
        self.expiration.set_max_age_seconds(seconds);
    }

    pub fn current_sequence(&self) -> Option<UnsignedIntegerFourBytes> {
        self.current_sequence
    }

    pub(crate) fn set_current_sequence(&mut self, sequence: UnsignedIntegerFourBytes) {
        self.current_sequence = Some(sequence);
    }

    /// Advance the sequence after an event was sent. Wraps from the maximum
    /// to 1, since 0 is reserved for the initial event.
    pub fn increment_sequence(&mut self) -> UnsignedIntegerFourBytes {
        let mut sequence = self.current_sequence.unwrap_or_default();
        let next = sequence.increment(true);
        self.current_sequence = Some(next);
        next
    }

    pub fn current_values(&self) -> &HashMap<String, StateVariableValue> {
        &self.current_values
    }

    pub fn current_value(&self, name: &str) -> Option<&StateVariableValue> {
        self.current_values.get(name)
    }

    pub(crate) fn replace_current_values(&mut self, values: impl IntoIterator<Item = StateVariableValue>) {
        self.current_values = values
            .into_iter()
            .map(|v| (v.name().to_string(), v))
            .collect();
    }

    pub(crate) fn merge_current_values(&mut self, values: impl IntoIterator<Item = StateVariableValue>) {
        for value in values {
            self.current_values.insert(value.name().to_string(), value);
        }
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.phase
    }

    /// Move to `to`, rejecting transitions out of a terminal phase and back
    /// into `Created`.
    pub(crate) fn transition(&mut self, to: SubscriptionPhase) -> Result<()> {
        let allowed = match (self.phase, to) {
            (from, _) if from.is_terminal() => false,
            (_, SubscriptionPhase::Created) => false,
            (SubscriptionPhase::Established, SubscriptionPhase::Established) => false,
            _ => true,
        };
        if !allowed {
            return Err(GenaError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub fn expiration(&self) -> &ExpirationDetails {
        &self.expiration
    }

    pub(crate) fn stamp_last_refresh(&mut self, clock: &dyn Clock) {
        self.expiration.stamp_last_refresh(clock);
    }

    /// Whether the subscription outlived its actual duration, or half of it
    /// when checking for renewal.
    pub fn has_expired(&self, half_time: bool, clock: &dyn Clock) -> bool {
        self.expiration.has_expired(half_time, clock)
    }

    pub fn seconds_until_expiration(&self, clock: &dyn Clock) -> i64 {
        self.expiration.seconds_until_expiration(clock)
    }

    /// Renewals attempted since the last successful refresh.
    pub fn renew_attempts(&self) -> u32 {
        self.expiration.renew_attempts()
    }

    pub(crate) fn record_renew_attempt(&mut self) -> u32 {
        self.expiration.record_renew_attempt();
        self.expiration.renew_attempts()
    }

    pub(crate) fn reset_renew_attempts(&mut self) {
        self.expiration.reset_renew_attempts();
    }
}
