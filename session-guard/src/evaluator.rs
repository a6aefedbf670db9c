use std::time::Duration;

use crate::clock::duration_millis;
use crate::config::GuardSettings;

/// Timing thresholds that decide when a session must be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub inactivity_timeout: Duration,
    pub force_close_threshold: Duration,
}

impl LockPolicy {
    pub fn new(inactivity_timeout: Duration, force_close_threshold: Duration) -> Self {
        Self {
            inactivity_timeout,
            force_close_threshold,
        }
    }

    pub fn from_settings(settings: &GuardSettings) -> Self {
        Self::new(settings.inactivity_timeout, settings.force_close_threshold)
    }

    /// Whether returning after `elapsed_ms` in the background requires unlock.
    pub fn should_lock(&self, elapsed_ms: i64, is_authenticated: bool) -> bool {
        should_lock(elapsed_ms, is_authenticated, self.inactivity_timeout)
    }

    /// Whether a heartbeat `elapsed_ms` old marks a suspicious cold start.
    pub fn is_stale_heartbeat(&self, elapsed_ms: i64) -> bool {
        elapsed_ms.max(0) > duration_millis(self.force_close_threshold)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from_settings(&GuardSettings::default())
    }
}

/// Pure lock decision. Unauthenticated sessions never lock; negative elapsed
/// time (clock skew) counts as zero.
pub fn should_lock(elapsed_ms: i64, is_authenticated: bool, inactivity_timeout: Duration) -> bool {
    if !is_authenticated {
        return false;
    }
    elapsed_ms.max(0) >= duration_millis(inactivity_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockPolicy {
        LockPolicy::new(Duration::from_millis(20_000), Duration::from_millis(5_000))
    }

    #[test]
    fn below_timeout_never_locks() {
        let policy = policy();
        for elapsed in [0, 1, 10_000, 19_999] {
            assert!(!policy.should_lock(elapsed, true), "elapsed {}", elapsed);
        }
    }

    #[test]
    fn at_or_above_timeout_always_locks() {
        let policy = policy();
        for elapsed in [20_000, 20_001, 86_400_000, i64::MAX] {
            assert!(policy.should_lock(elapsed, true), "elapsed {}", elapsed);
        }
    }

    #[test]
    fn unauthenticated_never_locks() {
        let policy = policy();
        for elapsed in [i64::MIN, -1, 0, 20_000, i64::MAX] {
            assert!(!policy.should_lock(elapsed, false));
        }
    }

    #[test]
    fn clock_skew_is_treated_as_zero() {
        assert!(!policy().should_lock(-50_000, true));
        // A zero timeout locks on every return, skewed or not.
        assert!(should_lock(-1, true, Duration::ZERO));
    }

    #[test]
    fn stale_heartbeat_is_strictly_greater() {
        let policy = policy();
        assert!(!policy.is_stale_heartbeat(5_000));
        assert!(policy.is_stale_heartbeat(5_001));
        assert!(policy.is_stale_heartbeat(10_000));
        assert!(!policy.is_stale_heartbeat(-10_000));
    }
}
