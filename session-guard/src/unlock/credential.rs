use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::config::GuardSettings;
use crate::errors::{GuardError, GuardResult};
use crate::session::SessionManager;
use crate::storage::{keys, KeyValueStore};
use crate::validation::InputValidator;

const SALT_LEN: usize = 16;

/// Argon2id cost parameters for PIN hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinHasher {
    memory_kib: u32,
    iterations: u32,
}

impl PinHasher {
    pub fn new(memory_kib: u32, iterations: u32) -> Self {
        Self {
            memory_kib: memory_kib.max(8),
            iterations: iterations.max(1),
        }
    }

    pub fn from_settings(settings: &GuardSettings) -> Self {
        Self::new(settings.pin_kdf_memory_kib, settings.pin_kdf_iterations)
    }

    /// Hash `pin` with a fresh random salt into a PHC string.
    pub fn hash_pin(&self, pin: &str) -> GuardResult<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let salt_string = SaltString::encode_b64(&salt)
            .map_err(|e| GuardError::CryptoError(format!("Salt encoding error: {}", e)))?;

        let params = Params::new(self.memory_kib, self.iterations, 1, None)
            .map_err(|e| GuardError::CryptoError(format!("Invalid KDF parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let hash = argon2
            .hash_password(pin.as_bytes(), &salt_string)
            .map_err(|e| GuardError::CryptoError(format!("PIN hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Check `pin` against a stored PHC string. Cost parameters come from the hash.
    pub fn verify_pin(phc: &str, pin: &str) -> GuardResult<bool> {
        let parsed = PasswordHash::new(phc)
            .map_err(|e| GuardError::CryptoError(format!("Stored PIN hash unreadable: {}", e)))?;
        match Argon2::default().verify_password(pin.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(GuardError::CryptoError(format!(
                "PIN verification failed: {}",
                e
            ))),
        }
    }
}

impl Default for PinHasher {
    fn default() -> Self {
        Self::from_settings(&GuardSettings::default())
    }
}

/// Result of checking a PIN against the stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Match,
    Mismatch,
    /// The stored hash could not be read; nothing was compared.
    Unverifiable,
}

/// The unlock PIN, kept only as an Argon2id hash under `APP_PIN_HASH`.
///
/// The PIN can only be changed from an unlocked session, and an existing PIN
/// must be confirmed before it is replaced.
#[derive(Clone)]
pub struct PinCredentialStore {
    store: Arc<dyn KeyValueStore>,
    session: SessionManager,
    hasher: PinHasher,
}

impl PinCredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>, session: SessionManager, hasher: PinHasher) -> Self {
        Self {
            store,
            session,
            hasher,
        }
    }

    /// Validate, hash and persist a new PIN. `current` is required whenever a
    /// PIN is already configured.
    pub async fn set_pin(
        &self,
        current: Option<&SecretString>,
        pin: &SecretString,
    ) -> GuardResult<()> {
        if self.session.requires_unlock() {
            return Err(GuardError::PermissionDenied(
                "Unlock the app before changing the PIN".to_string(),
            ));
        }

        let validator = InputValidator::default();
        validator.validate_pin(pin.expose_secret())?;

        if self.has_pin().await? {
            let Some(current) = current else {
                return Err(GuardError::InvalidCredential(
                    "Current PIN required".to_string(),
                ));
            };
            if self.check(current.expose_secret()).await? != PinCheck::Match {
                return Err(GuardError::InvalidCredential(
                    "Current PIN is incorrect".to_string(),
                ));
            }
        }

        if validator.is_trivial_pin(pin.expose_secret()) {
            log::warn!("Unlock PIN is a repeated or sequential pattern");
        }

        let hasher = self.hasher;
        let owned = Zeroizing::new(pin.expose_secret().to_string());
        let phc = tokio::task::spawn_blocking(move || hasher.hash_pin(&owned))
            .await
            .map_err(|e| GuardError::Unknown(format!("PIN hashing task failed: {}", e)))??;

        self.store.set(keys::APP_PIN_HASH, &phc).await?;
        log::info!("Unlock PIN updated");
        Ok(())
    }

    pub async fn has_pin(&self) -> GuardResult<bool> {
        Ok(self.store.get(keys::APP_PIN_HASH).await?.is_some())
    }

    /// Compare `pin` with the stored hash off the async executor.
    ///
    /// A missing PIN is [`GuardError::NotFound`]; an unreadable store or a
    /// corrupt hash is [`PinCheck::Unverifiable`].
    pub async fn check(&self, pin: &str) -> GuardResult<PinCheck> {
        let phc = match self.store.get(keys::APP_PIN_HASH).await {
            Ok(Some(phc)) => phc,
            Ok(None) => {
                return Err(GuardError::NotFound(
                    "No unlock PIN configured".to_string(),
                ))
            }
            Err(err) => {
                log::warn!("Stored PIN hash unreadable: {}", err);
                return Ok(PinCheck::Unverifiable);
            }
        };

        let owned = Zeroizing::new(pin.to_string());
        let verdict = tokio::task::spawn_blocking(move || PinHasher::verify_pin(&phc, &owned))
            .await
            .map_err(|e| GuardError::Unknown(format!("PIN verification task failed: {}", e)))?;

        match verdict {
            Ok(true) => Ok(PinCheck::Match),
            Ok(false) => Ok(PinCheck::Mismatch),
            Err(err) => {
                log::warn!("{}", err);
                Ok(PinCheck::Unverifiable)
            }
        }
    }
}

impl std::fmt::Debug for PinCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCredentialStore")
            .field("hasher", &self.hasher)
            .finish()
    }
}
