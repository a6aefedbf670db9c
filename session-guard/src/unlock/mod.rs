//! Unlock gate: the blocking credential surface shown while the session is locked.
//!
//! The lock flag is removed only after a PIN or biometric check has actually
//! succeeded.

pub mod credential;
pub mod pin_pad;

use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::biometric::{validate_reason, BiometricAuthenticator, BiometricVerdict};
use crate::errors::{GuardError, GuardResult};
use crate::heartbeat::HeartbeatTracker;
use crate::session::SessionManager;
use crate::storage::markers::read_biometric_enabled;
use crate::storage::{keys, KeyValueStore};
use crate::validation::InputValidator;

pub use credential::{PinCheck, PinCredentialStore, PinHasher};
pub use pin_pad::PinBuffer;

pub const INCORRECT_PIN_MESSAGE: &str = "Incorrect PIN";
pub const BIOMETRIC_FAILED_MESSAGE: &str = "Biometric verification failed";
pub const UNVERIFIABLE_MESSAGE: &str = "Unable to verify right now, please try again";
pub const NO_PIN_MESSAGE: &str = "No unlock PIN set, sign in again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockMethod {
    Pin,
    Biometric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Credential verified; the lock flag is cleared.
    Unlocked { method: UnlockMethod },
    /// Still locked; `message` is shown inline under the keypad.
    Rejected {
        message: String,
        remaining_attempts: u32,
    },
    /// The gate was not being presented.
    NotRequired,
}

impl UnlockOutcome {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, UnlockOutcome::Unlocked { .. })
    }
}

/// Result of one keypad press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEntry {
    Pending { entered: usize },
    Submitted(UnlockOutcome),
}

pub struct UnlockGate {
    store: Arc<dyn KeyValueStore>,
    session: SessionManager,
    tracker: HeartbeatTracker,
    credentials: PinCredentialStore,
    biometric: Arc<dyn BiometricAuthenticator>,
    validator: InputValidator,
    buffer: Mutex<PinBuffer>,
    last_error: Mutex<Option<String>>,
}

impl UnlockGate {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        session: SessionManager,
        tracker: HeartbeatTracker,
        credentials: PinCredentialStore,
        biometric: Arc<dyn BiometricAuthenticator>,
    ) -> Self {
        Self {
            store,
            session,
            tracker,
            credentials,
            biometric,
            validator: InputValidator::default(),
            buffer: Mutex::new(PinBuffer::new()),
            last_error: Mutex::new(None),
        }
    }

    /// Whether the blocking surface must be shown.
    pub fn is_presented(&self) -> bool {
        self.session.requires_unlock()
    }

    /// Credential methods to offer; biometrics only when the user enabled them.
    pub fn available_methods(&self) -> Vec<UnlockMethod> {
        let mut methods = vec![UnlockMethod::Pin];
        if self.session.snapshot().biometric_enabled {
            methods.push(UnlockMethod::Biometric);
        }
        methods
    }

    /// Inline error from the last rejected attempt.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn entered_digits(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn masked_entry(&self) -> String {
        self.buffer.lock().masked()
    }

    pub fn backspace(&self) {
        self.buffer.lock().pop();
    }

    /// Type one keypad digit; the fourth digit submits the PIN.
    pub async fn press_digit(&self, digit: char) -> GuardResult<PinEntry> {
        self.validator.validate_pin_digit(digit)?;

        let pin = {
            let mut buffer = self.buffer.lock();
            if !buffer.push(digit) {
                return Ok(PinEntry::Pending {
                    entered: buffer.len(),
                });
            }
            let pin = Zeroizing::new(buffer.as_str().to_string());
            buffer.clear();
            pin
        };

        Ok(PinEntry::Submitted(self.submit_pin(&pin).await?))
    }

    /// Verify a complete PIN. A wrong PIN keeps the session locked, shows
    /// [`INCORRECT_PIN_MESSAGE`] and empties the keypad buffer. With no PIN
    /// configured the attempt is rejected with [`NO_PIN_MESSAGE`]; the host
    /// recovers by signing out.
    pub async fn submit_pin(&self, pin: &str) -> GuardResult<UnlockOutcome> {
        if !self.is_presented() {
            self.buffer.lock().clear();
            return Ok(UnlockOutcome::NotRequired);
        }
        if let Some(rejected) = self.cooldown_rejection() {
            self.buffer.lock().clear();
            return Ok(rejected);
        }

        if let Err(GuardError::ValidationError(message)) = self.validator.validate_pin(pin) {
            self.buffer.lock().clear();
            return Ok(self.reject(message, self.session.remaining_attempts()));
        }

        let check = self.credentials.check(pin).await;
        self.buffer.lock().clear();
        let check = match check {
            Ok(check) => check,
            Err(GuardError::NotFound(_)) => {
                // Only a fresh sign-in recovers from here; nothing is counted.
                log::warn!("Unlock attempted with no PIN configured");
                return Ok(self.reject(
                    NO_PIN_MESSAGE.to_string(),
                    self.session.remaining_attempts(),
                ));
            }
            Err(err) => return Err(err),
        };
        match check {
            PinCheck::Match => Ok(self.complete_unlock(UnlockMethod::Pin).await),
            PinCheck::Mismatch => {
                let remaining = self
                    .session
                    .register_failed_attempt(self.tracker.now_millis());
                log::info!("Incorrect PIN entered, {} free attempts left", remaining);
                Ok(self.reject(INCORRECT_PIN_MESSAGE.to_string(), remaining))
            }
            PinCheck::Unverifiable => Ok(self.reject(
                UNVERIFIABLE_MESSAGE.to_string(),
                self.session.remaining_attempts(),
            )),
        }
    }

    /// Run the OS biometric prompt. Only offered when biometric unlock is
    /// enabled; hardware errors are returned so the PIN path stays available.
    pub async fn authenticate_biometric(&self, reason: &str) -> GuardResult<UnlockOutcome> {
        let reason = validate_reason(reason)?;
        if !self.is_presented() {
            return Ok(UnlockOutcome::NotRequired);
        }

        let enabled = read_biometric_enabled(self.store.as_ref()).await;
        self.session.set_biometric_enabled(enabled);
        if !enabled {
            return Err(GuardError::PermissionDenied(
                "Biometric unlock is not enabled".to_string(),
            ));
        }
        if let Some(rejected) = self.cooldown_rejection() {
            return Ok(rejected);
        }

        match self.biometric.authenticate(reason).await? {
            BiometricVerdict::Success => Ok(self.complete_unlock(UnlockMethod::Biometric).await),
            BiometricVerdict::Failed => {
                let remaining = self
                    .session
                    .register_failed_attempt(self.tracker.now_millis());
                Ok(self.reject(BIOMETRIC_FAILED_MESSAGE.to_string(), remaining))
            }
            BiometricVerdict::Cancelled => Ok(UnlockOutcome::Rejected {
                message: String::new(),
                remaining_attempts: self.session.remaining_attempts(),
            }),
        }
    }

    pub fn credentials(&self) -> &PinCredentialStore {
        &self.credentials
    }

    fn cooldown_rejection(&self) -> Option<UnlockOutcome> {
        match self
            .session
            .check_attempt_allowed(self.tracker.now_millis())
        {
            Ok(()) => None,
            Err(err) => {
                let message = match err {
                    GuardError::PermissionDenied(message) => message,
                    other => other.to_string(),
                };
                Some(self.reject(message, 0))
            }
        }
    }

    fn reject(&self, message: String, remaining_attempts: u32) -> UnlockOutcome {
        *self.last_error.lock() = Some(message.clone());
        UnlockOutcome::Rejected {
            message,
            remaining_attempts,
        }
    }

    async fn complete_unlock(&self, method: UnlockMethod) -> UnlockOutcome {
        if let Err(err) = self.store.remove(keys::SECURITY_LOCK).await {
            // The persisted flag survives, so the next cold start asks again.
            log::warn!("Failed to clear persisted lock flag: {}", err);
        }
        self.session.mark_unlocked();
        *self.last_error.lock() = None;
        self.tracker.record_heartbeat().await;
        log::info!("Session unlocked via {:?}", method);
        UnlockOutcome::Unlocked { method }
    }
}

impl std::fmt::Debug for UnlockGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockGate")
            .field("presented", &self.is_presented())
            .field("entered_digits", &self.entered_digits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biometric::{BiometricCapability, BiometricFactor, NoBiometrics, ScriptedBiometrics};
    use crate::clock::ManualClock;
    use crate::session::GuardPhase;
    use crate::storage::{MemoryStore, StoredFlags};
    use secrecy::SecretString;
    use std::time::Duration;

    struct Fixture {
        gate: UnlockGate,
        store: Arc<MemoryStore>,
        session: SessionManager,
        clock: Arc<ManualClock>,
    }

    async fn locked_fixture(biometric: Arc<dyn BiometricAuthenticator>) -> Fixture {
        let store = Arc::new(MemoryStore::with_entries([
            (keys::LAST_USER_EMAIL, "ada@example.com"),
            (keys::USER_PASSWORD, "secret"),
            (keys::SECURITY_LOCK, "true"),
        ]));
        let clock = Arc::new(ManualClock::new(1_000));
        let session = SessionManager::with_backoff(
            2,
            Duration::from_millis(100),
            Duration::from_millis(400),
        );

        // PIN provisioned while unlocked, before the stored lock is loaded.
        let credentials =
            PinCredentialStore::new(store.clone(), session.clone(), PinHasher::new(64, 1));
        credentials
            .set_pin(None, &SecretString::from("1234".to_string()))
            .await
            .unwrap();
        session.hydrate(StoredFlags::load(store.as_ref(), false).await);

        let gate = UnlockGate::new(
            store.clone(),
            session.clone(),
            HeartbeatTracker::new(store.clone(), clock.clone()),
            credentials,
            biometric,
        );
        Fixture {
            gate,
            store,
            session,
            clock,
        }
    }

    #[tokio::test]
    async fn correct_pin_unlocks() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        assert!(f.gate.is_presented());

        for digit in ['1', '2', '3'] {
            assert!(matches!(
                f.gate.press_digit(digit).await.unwrap(),
                PinEntry::Pending { .. }
            ));
        }
        let entry = f.gate.press_digit('4').await.unwrap();

        assert_eq!(
            entry,
            PinEntry::Submitted(UnlockOutcome::Unlocked {
                method: UnlockMethod::Pin
            })
        );
        assert_eq!(f.store.peek(keys::SECURITY_LOCK), None);
        assert_eq!(f.session.phase(), GuardPhase::Active);
        assert!(!f.gate.is_presented());
        assert_eq!(f.gate.entered_digits(), 0);
    }

    #[tokio::test]
    async fn wrong_pin_keeps_lock_and_resets_buffer() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        for digit in ['4', '3', '2'] {
            f.gate.press_digit(digit).await.unwrap();
        }
        let entry = f.gate.press_digit('1').await.unwrap();

        assert_eq!(
            entry,
            PinEntry::Submitted(UnlockOutcome::Rejected {
                message: INCORRECT_PIN_MESSAGE.to_string(),
                remaining_attempts: 1,
            })
        );
        assert_eq!(f.store.peek(keys::SECURITY_LOCK).as_deref(), Some("true"));
        assert_eq!(f.session.phase(), GuardPhase::Locked);
        assert_eq!(f.gate.entered_digits(), 0);
        assert_eq!(f.gate.last_error().as_deref(), Some(INCORRECT_PIN_MESSAGE));

        // Retry is allowed.
        assert!(f.gate.submit_pin("1234").await.unwrap().is_unlocked());
        assert_eq!(f.gate.last_error(), None);
    }

    #[tokio::test]
    async fn cooldown_after_free_attempts() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        f.gate.submit_pin("0000").await.unwrap();
        f.gate.submit_pin("0000").await.unwrap();
        f.gate.submit_pin("0000").await.unwrap();

        // Even the right PIN waits out the cooldown.
        match f.gate.submit_pin("1234").await.unwrap() {
            UnlockOutcome::Rejected { message, .. } => assert!(message.contains("Retry")),
            other => panic!("expected cooldown rejection, got {:?}", other),
        }
        assert_eq!(f.store.peek(keys::SECURITY_LOCK).as_deref(), Some("true"));

        f.clock.advance(Duration::from_millis(100));
        assert!(f.gate.submit_pin("1234").await.unwrap().is_unlocked());
    }

    #[tokio::test]
    async fn unreadable_hash_never_unlocks() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        f.store.set_fail_reads(true);
        let outcome = f.gate.submit_pin("1234").await.unwrap();
        assert_eq!(
            outcome,
            UnlockOutcome::Rejected {
                message: UNVERIFIABLE_MESSAGE.to_string(),
                remaining_attempts: 2,
            }
        );
        f.store.set_fail_reads(false);
        assert_eq!(f.store.peek(keys::SECURITY_LOCK).as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn not_presented_when_unlocked() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        f.gate.submit_pin("1234").await.unwrap();
        assert_eq!(
            f.gate.submit_pin("1234").await.unwrap(),
            UnlockOutcome::NotRequired
        );
    }

    #[tokio::test]
    async fn biometric_requires_opt_in() {
        let device = Arc::new(ScriptedBiometrics::new(BiometricCapability::enrolled(&[
            BiometricFactor::Fingerprint,
        ])));
        device.push_verdict(BiometricVerdict::Success);
        let f = locked_fixture(device.clone()).await;
        assert_eq!(f.gate.available_methods(), vec![UnlockMethod::Pin]);

        let err = f.gate.authenticate_biometric("Unlock wallet").await.unwrap_err();
        assert!(matches!(err, GuardError::PermissionDenied(_)));

        f.store.set(keys::BIOMETRIC_ENABLED, "true").await.unwrap();
        let outcome = f.gate.authenticate_biometric("Unlock wallet").await.unwrap();
        assert_eq!(
            outcome,
            UnlockOutcome::Unlocked {
                method: UnlockMethod::Biometric
            }
        );
        assert_eq!(f.store.peek(keys::SECURITY_LOCK), None);
    }

    #[tokio::test]
    async fn failed_biometric_keeps_lock() {
        let device = Arc::new(ScriptedBiometrics::new(BiometricCapability::enrolled(&[
            BiometricFactor::Face,
        ])));
        device.push_verdict(BiometricVerdict::Failed);
        let f = locked_fixture(device.clone()).await;
        f.store.set(keys::BIOMETRIC_ENABLED, "true").await.unwrap();

        let outcome = f.gate.authenticate_biometric("Unlock wallet").await.unwrap();
        assert!(matches!(outcome, UnlockOutcome::Rejected { ref message, .. } if message == BIOMETRIC_FAILED_MESSAGE));
        assert!(f.session.is_locked());
        assert_eq!(
            f.gate.available_methods(),
            vec![UnlockMethod::Pin, UnlockMethod::Biometric]
        );

        // Dismissing the prompt does not count as a failure.
        let before = f.session.remaining_attempts();
        f.gate.authenticate_biometric("Unlock wallet").await.unwrap();
        assert_eq!(f.session.remaining_attempts(), before);
    }

    #[tokio::test]
    async fn missing_hardware_leaves_pin_path() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        f.store.set(keys::BIOMETRIC_ENABLED, "true").await.unwrap();
        let err = f.gate.authenticate_biometric("Unlock wallet").await.unwrap_err();
        assert!(matches!(err, GuardError::BiometricUnavailable(_)));
        assert!(f.gate.submit_pin("1234").await.unwrap().is_unlocked());
    }

    #[tokio::test]
    async fn missing_pin_is_inline_rejection() {
        let f = locked_fixture(Arc::new(NoBiometrics)).await;
        f.store.remove(keys::APP_PIN_HASH).await.unwrap();

        for digit in ['1', '2', '3'] {
            f.gate.press_digit(digit).await.unwrap();
        }
        let entry = f.gate.press_digit('4').await.unwrap();
        assert_eq!(
            entry,
            PinEntry::Submitted(UnlockOutcome::Rejected {
                message: NO_PIN_MESSAGE.to_string(),
                remaining_attempts: 2,
            })
        );
        assert_eq!(f.gate.last_error().as_deref(), Some(NO_PIN_MESSAGE));
        assert_eq!(f.gate.entered_digits(), 0);
        assert!(f.session.is_locked());
        assert_eq!(f.store.peek(keys::SECURITY_LOCK).as_deref(), Some("true"));
    }
}
