use std::sync::Arc;

use crate::evaluator::LockPolicy;
use crate::heartbeat::HeartbeatTracker;
use crate::storage::{keys, AuthMarker, KeyValueStore, FLAG_TRUE};

/// What the cold-start check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceCloseOutcome {
    /// No signed-in user; the heartbeat was not consulted.
    Unauthenticated,
    /// Signed in but no readable heartbeat (first launch after sign-in).
    NoHeartbeat,
    /// Heartbeat recent enough; no lock.
    Fresh { elapsed_ms: i64 },
    /// Heartbeat stale; the lock flag was set.
    Locked { elapsed_ms: i64 },
}

impl ForceCloseOutcome {
    pub fn locked(&self) -> bool {
        matches!(self, ForceCloseOutcome::Locked { .. })
    }
}

/// Detects a process that was killed while holding a protected session.
pub struct ForceCloseDetector {
    store: Arc<dyn KeyValueStore>,
    tracker: HeartbeatTracker,
    policy: LockPolicy,
    fail_closed: bool,
}

impl ForceCloseDetector {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        tracker: HeartbeatTracker,
        policy: LockPolicy,
        fail_closed: bool,
    ) -> Self {
        Self {
            store,
            tracker,
            policy,
            fail_closed,
        }
    }

    /// Run once at cold start, before any protected UI. Always ends by
    /// writing a fresh heartbeat.
    pub async fn check_force_close(&self) -> ForceCloseOutcome {
        let outcome = self.evaluate().await;
        self.tracker.record_heartbeat().await;
        log::info!("Cold-start check: {:?}", outcome);
        outcome
    }

    async fn evaluate(&self) -> ForceCloseOutcome {
        let authenticated = AuthMarker::load(self.store.as_ref(), self.fail_closed)
            .await
            .is_authenticated();
        if !authenticated {
            return ForceCloseOutcome::Unauthenticated;
        }

        let Some(last_active) = self.tracker.last_heartbeat().await else {
            return ForceCloseOutcome::NoHeartbeat;
        };

        let elapsed_ms = self.tracker.now_millis().saturating_sub(last_active);
        if !self.policy.is_stale_heartbeat(elapsed_ms) {
            return ForceCloseOutcome::Fresh { elapsed_ms };
        }

        if let Err(err) = self.store.set(keys::SECURITY_LOCK, FLAG_TRUE).await {
            log::warn!("Failed to persist force-close lock flag: {}", err);
        }
        ForceCloseOutcome::Locked { elapsed_ms }
    }
}

impl std::fmt::Debug for ForceCloseDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForceCloseDetector")
            .field("policy", &self.policy)
            .field("fail_closed", &self.fail_closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    fn detector(store: Arc<MemoryStore>) -> ForceCloseDetector {
        let clock = Arc::new(ManualClock::new(NOW));
        ForceCloseDetector::new(
            store.clone(),
            HeartbeatTracker::new(store, clock),
            LockPolicy::new(Duration::from_millis(20_000), Duration::from_millis(5_000)),
            false,
        )
    }

    fn signed_in_with_heartbeat(heartbeat: i64) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_entries([
            (keys::LAST_USER_EMAIL, "ada@example.com".to_string()),
            (keys::USER_PASSWORD, "secret".to_string()),
            (keys::LAST_ACTIVE_TIMESTAMP, heartbeat.to_string()),
        ]))
    }

    #[tokio::test]
    async fn stale_heartbeat_sets_lock() {
        let store = signed_in_with_heartbeat(NOW - 10_000);
        let outcome = detector(store.clone()).check_force_close().await;

        assert_eq!(outcome, ForceCloseOutcome::Locked { elapsed_ms: 10_000 });
        assert_eq!(store.peek(keys::SECURITY_LOCK).as_deref(), Some("true"));
        assert_eq!(
            store.peek(keys::LAST_ACTIVE_TIMESTAMP),
            Some(NOW.to_string())
        );
    }

    #[tokio::test]
    async fn recent_heartbeat_is_fresh() {
        let store = signed_in_with_heartbeat(NOW - 5_000);
        let outcome = detector(store.clone()).check_force_close().await;
        assert_eq!(outcome, ForceCloseOutcome::Fresh { elapsed_ms: 5_000 });
        assert_eq!(store.peek(keys::SECURITY_LOCK), None);
    }

    #[tokio::test]
    async fn unauthenticated_skips_timestamp_check() {
        let store = Arc::new(MemoryStore::with_entries([(
            keys::LAST_ACTIVE_TIMESTAMP,
            "0",
        )]));
        let outcome = detector(store.clone()).check_force_close().await;

        assert_eq!(outcome, ForceCloseOutcome::Unauthenticated);
        assert_eq!(store.peek(keys::SECURITY_LOCK), None);
        assert_eq!(
            store.peek(keys::LAST_ACTIVE_TIMESTAMP),
            Some(NOW.to_string())
        );
    }

    #[tokio::test]
    async fn missing_heartbeat_does_not_lock() {
        let store = Arc::new(MemoryStore::with_entries([
            (keys::LAST_USER_EMAIL, "ada@example.com"),
            (keys::USER_PASSWORD, "secret"),
        ]));
        let outcome = detector(store.clone()).check_force_close().await;
        assert_eq!(outcome, ForceCloseOutcome::NoHeartbeat);
        assert!(!outcome.locked());
        assert!(store.peek(keys::LAST_ACTIVE_TIMESTAMP).is_some());
    }
}
