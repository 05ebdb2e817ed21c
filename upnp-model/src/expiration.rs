//! Expiration bookkeeping for subscriptions and other leased items.

use crate::clock::Clock;

/// Max age of `0` means the item never expires.
pub const MAX_AGE_NEVER: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationDetails {
    max_age_seconds: u32,
    last_refresh_millis: u64,
    renew_attempts: u32,
}

impl ExpirationDetails {
    pub fn new(max_age_seconds: u32, clock: &dyn Clock) -> Self {
        Self {
            max_age_seconds,
            last_refresh_millis: clock.now_millis(),
            renew_attempts: 0,
        }
    }

    pub fn max_age_seconds(&self) -> u32 {
        self.max_age_seconds
    }

    pub fn set_max_age_seconds(&mut self, max_age_seconds: u32) {
        self.max_age_seconds = max_age_seconds;
    }

    pub fn last_refresh_millis(&self) -> u64 {
        self.last_refresh_millis
    }

    pub fn stamp_last_refresh(&mut self, clock: &dyn Clock) {
        self.last_refresh_millis = clock.now_millis();
    }

    pub fn renew_attempts(&self) -> u32 {
        self.renew_attempts
    }

    pub fn record_renew_attempt(&mut self) {
        self.renew_attempts += 1;
    }

    pub fn reset_renew_attempts(&mut self) {
        self.renew_attempts = 0;
    }

    /// With `half_time` the item counts as expired once half its max age has
    /// passed, which is when renewal should start.
    pub fn has_expired(&self, half_time: bool, clock: &dyn Clock) -> bool {
        if self.max_age_seconds == MAX_AGE_NEVER {
            return false;
        }
        let divisor = if half_time { 2 } else { 1 };
        let lifetime_millis = (self.max_age_seconds / divisor) as u64 * 1000;
        self.last_refresh_millis + lifetime_millis < clock.now_millis()
    }

    /// Seconds left before expiry, negative once expired.
    pub fn seconds_until_expiration(&self, clock: &dyn Clock) -> i64 {
        if self.max_age_seconds == MAX_AGE_NEVER {
            return i64::MAX;
        }
        let expires_at = self.last_refresh_millis as i64 + self.max_age_seconds as i64 * 1000;
        (expires_at - clock.now_millis() as i64) / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_expiry_and_half_time() {
        let clock = ManualClock::new(0);
        let details = ExpirationDetails::new(1800, &clock);

        clock.set(899_000);
        assert!(!details.has_expired(true, &clock));
        clock.set(900_001);
        assert!(details.has_expired(true, &clock));
        assert!(!details.has_expired(false, &clock));
        assert_eq!(details.seconds_until_expiration(&clock), 899);

        clock.set(1_800_001);
        assert!(details.has_expired(false, &clock));
    }

    #[test]
    fn test_stamp_refresh_restarts_lifetime() {
        let clock = ManualClock::new(0);
        let mut details = ExpirationDetails::new(10, &clock);
        clock.set(20_000);
        assert!(details.has_expired(false, &clock));
        details.stamp_last_refresh(&clock);
        assert!(!details.has_expired(false, &clock));
        assert_eq!(details.seconds_until_expiration(&clock), 10);
    }

    #[test]
    fn test_never_expires() {
        let clock = ManualClock::new(0);
        let details = ExpirationDetails::new(MAX_AGE_NEVER, &clock);
        clock.set(u32::MAX as u64);
        assert!(!details.has_expired(false, &clock));
        assert_eq!(details.seconds_until_expiration(&clock), i64::MAX);
    }
}
