use std::collections::VecDeque;
use std::sync::Arc;

use arrayvec::ArrayVec;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{GuardError, GuardResult};
use crate::session::SessionManager;
use crate::storage::markers::read_biometric_enabled;
use crate::storage::{keys, KeyValueStore, FLAG_FALSE, FLAG_TRUE};

pub const MAX_BIOMETRIC_TYPES: usize = 4;
const MAX_REASON_LENGTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricFactor {
    Fingerprint,
    Face,
    Iris,
    Voice,
}

impl BiometricFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricFactor::Fingerprint => "fingerprint",
            BiometricFactor::Face => "face",
            BiometricFactor::Iris => "iris",
            BiometricFactor::Voice => "voice",
        }
    }
}

/// What the device can do right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BiometricCapability {
    pub hardware_available: bool,
    pub enrolled: bool,
    pub factors: ArrayVec<BiometricFactor, MAX_BIOMETRIC_TYPES>,
}

impl BiometricCapability {
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn enrolled(factors: &[BiometricFactor]) -> Self {
        let mut supported = ArrayVec::new();
        for factor in factors.iter().take(MAX_BIOMETRIC_TYPES) {
            supported.push(*factor);
        }
        Self {
            hardware_available: true,
            enrolled: true,
            factors: supported,
        }
    }

    /// Error to show the user when biometrics cannot be turned on.
    fn blocking_reason(&self) -> Option<&'static str> {
        if !self.hardware_available {
            Some("This device has no biometric hardware")
        } else if !self.enrolled {
            Some("No fingerprint or face is enrolled on this device")
        } else {
            None
        }
    }
}

/// Result of one OS biometric prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricVerdict {
    Success,
    Failed,
    /// The user dismissed the prompt.
    Cancelled,
}

/// The OS biometric API.
#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    async fn capability(&self) -> BiometricCapability;
    async fn authenticate(&self, reason: &str) -> GuardResult<BiometricVerdict>;
}

/// Host without biometric support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiometrics;

#[async_trait]
impl BiometricAuthenticator for NoBiometrics {
    async fn capability(&self) -> BiometricCapability {
        BiometricCapability::unavailable()
    }

    async fn authenticate(&self, _reason: &str) -> GuardResult<BiometricVerdict> {
        Err(GuardError::BiometricUnavailable(
            "Biometric hardware unavailable".to_string(),
        ))
    }
}

/// Authenticator that replays queued verdicts; used by the harness and tests.
#[derive(Debug, Default)]
pub struct ScriptedBiometrics {
    capability: BiometricCapability,
    verdicts: Mutex<VecDeque<BiometricVerdict>>,
}

impl ScriptedBiometrics {
    pub fn new(capability: BiometricCapability) -> Self {
        Self {
            capability,
            verdicts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_verdict(&self, verdict: BiometricVerdict) {
        self.verdicts.lock().push_back(verdict);
    }
}

#[async_trait]
impl BiometricAuthenticator for ScriptedBiometrics {
    async fn capability(&self) -> BiometricCapability {
        self.capability.clone()
    }

    async fn authenticate(&self, _reason: &str) -> GuardResult<BiometricVerdict> {
        if let Some(reason) = self.capability.blocking_reason() {
            return Err(GuardError::BiometricUnavailable(reason.to_string()));
        }
        // An empty script behaves like the user backing out.
        Ok(self
            .verdicts
            .lock()
            .pop_front()
            .unwrap_or(BiometricVerdict::Cancelled))
    }
}

/// Validate the prompt text shown by the OS dialog.
pub fn validate_reason(reason: &str) -> GuardResult<&str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(GuardError::ValidationError(
            "Biometric prompt reason cannot be empty".to_string(),
        ));
    }
    if reason.len() > MAX_REASON_LENGTH {
        return Err(GuardError::ValidationError(format!(
            "Biometric prompt reason exceeds {} characters",
            MAX_REASON_LENGTH
        )));
    }
    Ok(reason)
}

/// The biometric toggle from the settings screen.
///
/// Only chooses which credential the unlock gate offers; it never affects
/// when the app locks.
pub struct BiometricSettings {
    store: Arc<dyn KeyValueStore>,
    session: SessionManager,
    authenticator: Arc<dyn BiometricAuthenticator>,
}

impl BiometricSettings {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        session: SessionManager,
        authenticator: Arc<dyn BiometricAuthenticator>,
    ) -> Self {
        Self {
            store,
            session,
            authenticator,
        }
    }

    /// Turn biometric unlock on. Missing hardware or enrollment is returned as
    /// [`GuardError::BiometricUnavailable`] for a one-time alert and the flag
    /// is left untouched.
    pub async fn enable(&self) -> GuardResult<()> {
        let capability = self.authenticator.capability().await;
        if let Some(reason) = capability.blocking_reason() {
            log::info!("Biometric enable refused: {}", reason);
            return Err(GuardError::BiometricUnavailable(reason.to_string()));
        }

        self.store.set(keys::BIOMETRIC_ENABLED, FLAG_TRUE).await?;
        self.session.set_biometric_enabled(true);
        log::info!(
            "Biometric unlock enabled ({})",
            capability
                .factors
                .iter()
                .map(|factor| factor.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(())
    }

    pub async fn disable(&self) -> GuardResult<()> {
        self.store.set(keys::BIOMETRIC_ENABLED, FLAG_FALSE).await?;
        self.session.set_biometric_enabled(false);
        Ok(())
    }

    pub async fn is_enabled(&self) -> bool {
        read_biometric_enabled(self.store.as_ref()).await
    }
}

impl std::fmt::Debug for BiometricSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricSettings")
            .field("enabled", &self.session.snapshot().biometric_enabled)
            .finish()
    }
}
