//! Foreground/background observer.
//!
//! Driven purely by OS lifecycle callbacks; nothing here polls.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::errors::GuardError;
use crate::evaluator::LockPolicy;
use crate::heartbeat::HeartbeatTracker;
use crate::session::{GuardPhase, SessionManager};
use crate::storage::{keys, AuthMarker, KeyValueStore, FLAG_TRUE};

/// App state as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Active,
    Inactive,
    Background,
}

impl AppLifecycle {
    fn is_away(self) -> bool {
        matches!(self, AppLifecycle::Inactive | AppLifecycle::Background)
    }
}

impl FromStr for AppLifecycle {
    type Err = GuardError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "foreground" => Ok(AppLifecycle::Active),
            "inactive" => Ok(AppLifecycle::Inactive),
            "background" => Ok(AppLifecycle::Background),
            other => Err(GuardError::ValidationError(format!(
                "Unknown app state '{}'",
                other
            ))),
        }
    }
}

pub struct LifecycleObserver {
    store: Arc<dyn KeyValueStore>,
    tracker: HeartbeatTracker,
    policy: LockPolicy,
    session: SessionManager,
    fail_closed: bool,
    // Held for the whole transition so edges are applied one at a time.
    backgrounded_at: Mutex<Option<i64>>,
}

impl LifecycleObserver {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        tracker: HeartbeatTracker,
        policy: LockPolicy,
        session: SessionManager,
        fail_closed: bool,
    ) -> Self {
        Self {
            store,
            tracker,
            policy,
            session,
            fail_closed,
            backgrounded_at: Mutex::new(None),
        }
    }

    /// Apply one OS lifecycle transition and return the resulting phase.
    pub async fn on_app_state_change(&self, next: AppLifecycle) -> GuardPhase {
        let mut backgrounded_at = self.backgrounded_at.lock().await;
        let current = self.session.phase();

        match (current, next) {
            (GuardPhase::Active, state) if state.is_away() => {
                let now = self.tracker.now_millis();
                *backgrounded_at = Some(now);
                self.session.set_phase(GuardPhase::Background);
                log::debug!("App moved to background at {}", now);
                self.tracker.record_heartbeat().await;
            }
            (GuardPhase::Background, AppLifecycle::Active) => {
                let now = self.tracker.now_millis();
                let since = backgrounded_at.take().unwrap_or(now);
                let elapsed = now.saturating_sub(since);
                let authenticated = AuthMarker::load(self.store.as_ref(), self.fail_closed)
                    .await
                    .is_authenticated();
                self.session.set_authenticated(authenticated);

                if self.policy.should_lock(elapsed, authenticated) {
                    self.persist_lock_flag().await;
                    self.session.mark_locked();
                    log::info!("Session locked after {} ms in background", elapsed);
                } else {
                    self.session.set_phase(GuardPhase::Active);
                    log::debug!("Returned after {} ms, no lock required", elapsed);
                }
                self.tracker.record_heartbeat().await;
            }
            (GuardPhase::Background, _) => {
                // Still away; keep the first background timestamp.
            }
            (GuardPhase::Locked, state) => {
                // Only the unlock gate leaves `Locked`.
                *backgrounded_at = None;
                if state.is_away() {
                    self.tracker.record_heartbeat().await;
                }
            }
            (GuardPhase::Active, _) => {}
        }

        self.session.phase()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    async fn persist_lock_flag(&self) {
        // The in-memory lock applies even when the write is lost.
        if let Err(err) = self.store.set(keys::SECURITY_LOCK, FLAG_TRUE).await {
            log::warn!("Failed to persist lock flag: {}", err);
        }
    }
}

impl std::fmt::Debug for LifecycleObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleObserver")
            .field("policy", &self.policy)
            .field("phase", &self.session.phase())
            .field("fail_closed", &self.fail_closed)
            .finish()
    }
}

/// Background task forwarding lifecycle events to an observer.
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct LifecyclePump {
    handle: JoinHandle<()>,
}

impl LifecyclePump {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for LifecyclePump {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn spawn_lifecycle_pump(
    observer: Arc<LifecycleObserver>,
    mut events: mpsc::Receiver<AppLifecycle>,
) -> LifecyclePump {
    let handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            observer.on_app_state_change(event).await;
        }
        log::debug!("Lifecycle event source closed");
    });
    LifecyclePump { handle }
}
