use std::sync::Arc;

use tokio::sync::watch;

use crate::biometric::{BiometricAuthenticator, BiometricSettings};
use crate::clock::Clock;
use crate::config::{GuardConfig, GuardSettings};
use crate::errors::GuardResult;
use crate::evaluator::LockPolicy;
use crate::force_close::{ForceCloseDetector, ForceCloseOutcome};
use crate::heartbeat::HeartbeatTracker;
use crate::lifecycle::LifecycleObserver;
use crate::session::{GuardPhase, SessionManager, SessionState};
use crate::storage::markers::read_lock_flag;
use crate::storage::{keys, AuthMarker, KeyValueStore, StoredFlags};
use crate::unlock::{PinCredentialStore, PinHasher, UnlockGate};

/// Application-wide guard context. Built once at launch; every protected
/// screen reads lock state through it.
pub struct AppGuard {
    store: Arc<dyn KeyValueStore>,
    settings: GuardSettings,
    session: SessionManager,
    tracker: HeartbeatTracker,
    observer: Arc<LifecycleObserver>,
    gate: UnlockGate,
    biometrics: BiometricSettings,
    force_close: ForceCloseOutcome,
}

impl AppGuard {
    /// Run the cold-start force-close check to completion, hydrate session
    /// state from the store and hand back the guard. No protected UI can be
    /// shown before this returns.
    pub async fn initialize(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        settings: GuardSettings,
        biometric: Arc<dyn BiometricAuthenticator>,
    ) -> GuardResult<Self> {
        let policy = LockPolicy::from_settings(&settings);
        let tracker = HeartbeatTracker::new(store.clone(), clock);
        let session = SessionManager::from_settings(&settings);

        let detector = ForceCloseDetector::new(
            store.clone(),
            tracker.clone(),
            policy,
            settings.fail_closed,
        );
        let force_close = detector.check_force_close().await;

        let mut flags = StoredFlags::load(store.as_ref(), settings.fail_closed).await;
        if flags.lock_flag && !flags.authenticated {
            // A lock flag without a signed-in user protects nothing.
            clear_lock_flag(store.as_ref()).await;
            flags.lock_flag = false;
        }
        session.hydrate(flags);
        if force_close.locked() && !session.is_locked() {
            // Flag write was lost; lock for this run anyway.
            session.mark_locked();
        }

        let observer = Arc::new(LifecycleObserver::new(
            store.clone(),
            tracker.clone(),
            policy,
            session.clone(),
            settings.fail_closed,
        ));
        let credentials = PinCredentialStore::new(
            store.clone(),
            session.clone(),
            PinHasher::from_settings(&settings),
        );
        let gate = UnlockGate::new(
            store.clone(),
            session.clone(),
            tracker.clone(),
            credentials,
            biometric.clone(),
        );
        let biometrics = BiometricSettings::new(store.clone(), session.clone(), biometric);

        log::info!(
            "Guard initialized: phase={:?} force_close={:?}",
            session.phase(),
            force_close
        );

        Ok(Self {
            store,
            settings,
            session,
            tracker,
            observer,
            gate,
            biometrics,
            force_close,
        })
    }

    /// [`AppGuard::initialize`] with settings taken from a [`GuardConfig`].
    pub async fn from_config(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &GuardConfig,
        biometric: Arc<dyn BiometricAuthenticator>,
    ) -> GuardResult<Self> {
        config.validate_required_configs()?;
        Self::initialize(store, clock, config.settings()?, biometric).await
    }

    pub fn observer(&self) -> Arc<LifecycleObserver> {
        self.observer.clone()
    }

    pub fn gate(&self) -> &UnlockGate {
        &self.gate
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn biometrics(&self) -> &BiometricSettings {
        &self.biometrics
    }

    pub fn credentials(&self) -> &PinCredentialStore {
        self.gate.credentials()
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn heartbeat(&self) -> &HeartbeatTracker {
        &self.tracker
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn requires_unlock(&self) -> bool {
        self.session.requires_unlock()
    }

    pub fn phase(&self) -> GuardPhase {
        self.session.phase()
    }

    pub fn force_close_outcome(&self) -> ForceCloseOutcome {
        self.force_close
    }

    /// Called by the auth flow after it stored the sign-in marker.
    pub async fn on_signed_in(&self) -> bool {
        let authenticated = AuthMarker::load(self.store.as_ref(), self.settings.fail_closed)
            .await
            .is_authenticated();
        self.session.set_authenticated(authenticated);
        if !authenticated {
            return false;
        }

        // A fresh sign-in outranks any flag left from an earlier session.
        if !self.session.is_locked() {
            let stored = read_lock_flag(self.store.as_ref(), false).await;
            if stored || self.session.snapshot().lock_flag {
                clear_lock_flag(self.store.as_ref()).await;
                self.session.mark_unlocked();
            }
        }
        self.tracker.record_heartbeat().await;
        true
    }

    /// Called by the auth flow on sign-out. A lock flag never outlives the
    /// authenticated marker.
    pub async fn on_signed_out(&self) -> GuardResult<()> {
        let result = self.store.remove(keys::SECURITY_LOCK).await;
        self.session.sign_out();
        log::info!("Signed out; lock state cleared");
        result
    }
}

async fn clear_lock_flag(store: &dyn KeyValueStore) {
    if let Err(err) = store.remove(keys::SECURITY_LOCK).await {
        log::warn!("Failed to clear stale lock flag: {}", err);
    }
}

impl std::fmt::Debug for AppGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppGuard")
            .field("state", &self.session.snapshot())
            .field("force_close", &self.force_close)
            .finish()
    }
}
