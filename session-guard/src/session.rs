use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::clock::duration_millis;
use crate::config::GuardSettings;
use crate::errors::{GuardError, GuardResult};
use crate::storage::StoredFlags;

/// Where the app sits in the inactivity-lock state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardPhase {
    Active,
    Background,
    Locked,
}

/// Single source of truth for lock state, published to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: GuardPhase,
    pub authenticated: bool,
    pub lock_flag: bool,
    pub biometric_enabled: bool,
    pub failed_attempts: u32,
    pub next_attempt_at_ms: Option<i64>,
}

impl SessionState {
    /// The unlock gate must be presented.
    pub fn requires_unlock(&self) -> bool {
        self.lock_flag && self.authenticated
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: GuardPhase::Active,
            authenticated: false,
            lock_flag: false,
            biometric_enabled: false,
            failed_attempts: 0,
            next_attempt_at_ms: None,
        }
    }
}

/// Owns [`SessionState`] and notifies subscribers on every change.
#[derive(Debug, Clone)]
pub struct SessionManager {
    state: Arc<watch::Sender<SessionState>>,
    max_failed_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_backoff_exponent: u32,
}

impl SessionManager {
    pub fn new(max_failed_attempts: u32) -> Self {
        Self::with_backoff(
            max_failed_attempts,
            Duration::from_secs(1),
            Duration::from_secs(32),
        )
    }

    pub fn with_backoff(
        max_failed_attempts: u32,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self {
            state: Arc::new(tx),
            max_failed_attempts: max_failed_attempts.max(1),
            backoff_base,
            backoff_cap: backoff_cap.max(backoff_base),
            max_backoff_exponent: 8,
        }
    }

    pub fn from_settings(settings: &GuardSettings) -> Self {
        Self::with_backoff(
            settings.max_failed_attempts,
            settings.backoff_base,
            settings.backoff_cap,
        )
    }

    /// Seed state from persisted flags. A stored lock on an authenticated
    /// session starts the app in `Locked`; without a signed-in user the flag
    /// is ignored.
    pub fn hydrate(&self, flags: StoredFlags) {
        self.state.send_modify(|state| {
            state.authenticated = flags.authenticated;
            state.lock_flag = flags.lock_flag && flags.authenticated;
            state.biometric_enabled = flags.biometric_enabled;
            state.phase = if state.requires_unlock() {
                GuardPhase::Locked
            } else {
                GuardPhase::Active
            };
        });
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn phase(&self) -> GuardPhase {
        self.state.borrow().phase
    }

    pub fn is_locked(&self) -> bool {
        self.phase() == GuardPhase::Locked
    }

    pub fn requires_unlock(&self) -> bool {
        self.state.borrow().requires_unlock()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    pub fn set_phase(&self, phase: GuardPhase) {
        self.state.send_if_modified(|state| {
            if state.phase == phase {
                return false;
            }
            state.phase = phase;
            true
        });
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.state.send_if_modified(|state| {
            if state.authenticated == authenticated {
                return false;
            }
            state.authenticated = authenticated;
            true
        });
    }

    pub fn set_biometric_enabled(&self, enabled: bool) {
        self.state.send_if_modified(|state| {
            if state.biometric_enabled == enabled {
                return false;
            }
            state.biometric_enabled = enabled;
            true
        });
    }

    /// Lock flag persisted; move to `Locked`.
    pub fn mark_locked(&self) {
        self.state.send_modify(|state| {
            state.lock_flag = true;
            state.phase = GuardPhase::Locked;
        });
    }

    /// Lock flag cleared after a verified credential; back to `Active`.
    pub fn mark_unlocked(&self) {
        self.state.send_modify(|state| {
            state.lock_flag = false;
            state.phase = GuardPhase::Active;
            state.failed_attempts = 0;
            state.next_attempt_at_ms = None;
        });
    }

    /// The user signed out: nothing left to protect.
    pub fn sign_out(&self) {
        self.state.send_modify(|state| {
            state.authenticated = false;
            state.lock_flag = false;
            state.phase = GuardPhase::Active;
            state.failed_attempts = 0;
            state.next_attempt_at_ms = None;
        });
    }

    /// Reject an attempt made during a cooldown window.
    pub fn check_attempt_allowed(&self, now_ms: i64) -> GuardResult<()> {
        let state = self.state.borrow();
        if let Some(until) = state.next_attempt_at_ms {
            if now_ms < until {
                let remaining = Duration::from_millis((until - now_ms) as u64);
                return Err(GuardError::PermissionDenied(format!(
                    "Unlock temporarily disabled. Retry in {}.{:03} seconds",
                    remaining.as_secs(),
                    remaining.subsec_millis()
                )));
            }
        }
        Ok(())
    }

    /// Record a wrong credential and return the free retries left before
    /// cooldowns begin.
    pub fn register_failed_attempt(&self, now_ms: i64) -> u32 {
        let max = self.max_failed_attempts;
        let base = self.backoff_base;
        let cap = self.backoff_cap;
        let max_exponent = self.max_backoff_exponent;

        let mut remaining = 0;
        self.state.send_modify(|state| {
            state.failed_attempts = state.failed_attempts.saturating_add(1);
            remaining = max.saturating_sub(state.failed_attempts);

            if state.failed_attempts <= max {
                state.next_attempt_at_ms = None;
                return;
            }

            let exponent = (state.failed_attempts - max).min(max_exponent);
            let multiplier = 1_u32 << exponent.saturating_sub(1);
            let delay = base.checked_mul(multiplier).unwrap_or(cap).min(cap);
            state.next_attempt_at_ms = Some(now_ms.saturating_add(duration_millis(delay)));
        });
        remaining
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_failed_attempts
            .saturating_sub(self.state.borrow().failed_attempts)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::from_settings(&GuardSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated_locked() -> StoredFlags {
        StoredFlags {
            authenticated: true,
            lock_flag: true,
            biometric_enabled: false,
        }
    }

    #[test]
    fn hydrate_locks_only_authenticated_sessions() {
        let manager = SessionManager::default();
        manager.hydrate(authenticated_locked());
        assert!(manager.is_locked());
        assert!(manager.requires_unlock());

        let manager = SessionManager::default();
        manager.hydrate(StoredFlags {
            authenticated: false,
            lock_flag: true,
            biometric_enabled: false,
        });
        assert_eq!(manager.phase(), GuardPhase::Active);
        assert!(!manager.requires_unlock());
        assert!(!manager.snapshot().lock_flag);
    }

    #[test]
    fn lock_and_unlock_cycle() {
        let manager = SessionManager::default();
        manager.set_authenticated(true);
        manager.mark_locked();
        assert!(manager.is_locked());

        manager.mark_unlocked();
        let state = manager.snapshot();
        assert_eq!(state.phase, GuardPhase::Active);
        assert!(!state.lock_flag);
    }

    #[tokio::test]
    async fn subscribers_see_changes_without_polling() {
        let manager = SessionManager::default();
        let mut rx = manager.subscribe();
        manager.set_authenticated(true);
        manager.mark_locked();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().requires_unlock());

        manager.mark_unlocked();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, GuardPhase::Active);
    }

    #[test]
    fn unchanged_values_do_not_notify() {
        let manager = SessionManager::default();
        let rx = manager.subscribe();
        manager.set_phase(GuardPhase::Active);
        manager.set_authenticated(false);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn free_attempts_then_backoff() {
        let manager = SessionManager::with_backoff(
            2,
            Duration::from_millis(10),
            Duration::from_millis(25),
        );
        assert_eq!(manager.register_failed_attempt(0), 1);
        assert!(manager.check_attempt_allowed(0).is_ok());
        assert_eq!(manager.register_failed_attempt(0), 0);
        assert!(manager.check_attempt_allowed(0).is_ok());

        // Third failure: 10ms cooldown.
        manager.register_failed_attempt(100);
        let err = manager.check_attempt_allowed(105).unwrap_err();
        assert!(matches!(err, GuardError::PermissionDenied(msg) if msg.contains("Retry")));
        assert!(manager.check_attempt_allowed(110).is_ok());

        // Fourth: 20ms. Fifth: capped at 25ms.
        manager.register_failed_attempt(200);
        assert!(manager.check_attempt_allowed(219).is_err());
        assert!(manager.check_attempt_allowed(220).is_ok());
        manager.register_failed_attempt(300);
        assert!(manager.check_attempt_allowed(324).is_err());
        assert!(manager.check_attempt_allowed(325).is_ok());
    }

    #[test]
    fn unlock_resets_attempts() {
        let manager = SessionManager::with_backoff(
            1,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        manager.register_failed_attempt(0);
        manager.register_failed_attempt(0);
        assert!(manager.check_attempt_allowed(5).is_err());

        manager.mark_unlocked();
        assert!(manager.check_attempt_allowed(5).is_ok());
        assert_eq!(manager.remaining_attempts(), 1);
    }

    #[test]
    fn sign_out_clears_lock() {
        let manager = SessionManager::default();
        manager.hydrate(authenticated_locked());
        manager.sign_out();
        let state = manager.snapshot();
        assert!(!state.authenticated);
        assert!(!state.lock_flag);
        assert_eq!(state.phase, GuardPhase::Active);
    }
}
