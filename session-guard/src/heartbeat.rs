use std::sync::Arc;

use crate::clock::Clock;
use crate::storage::{keys, read_or_absent, write_or_log, KeyValueStore};

/// Records the last known foreground activity time.
#[derive(Clone)]
pub struct HeartbeatTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl HeartbeatTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Write the current time to `LAST_ACTIVE_TIMESTAMP`. Last write wins.
    ///
    /// Failures are logged and dropped: losing one heartbeat is not fatal.
    pub async fn record_heartbeat(&self) {
        let now = self.clock.now_millis();
        let stored = write_or_log(
            self.store.as_ref(),
            keys::LAST_ACTIVE_TIMESTAMP,
            &now.to_string(),
        )
        .await;
        if stored {
            log::trace!("Heartbeat recorded at {}", now);
        }
    }

    /// Last recorded heartbeat, if one is readable.
    pub async fn last_heartbeat(&self) -> Option<i64> {
        let raw = read_or_absent(self.store.as_ref(), keys::LAST_ACTIVE_TIMESTAMP).await?;
        match raw.trim().parse::<i64>() {
            Ok(millis) => Some(millis),
            Err(_) => {
                log::warn!("Ignoring unparsable heartbeat value '{}'", raw);
                None
            }
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

impl std::fmt::Debug for HeartbeatTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatTracker")
            .field("now_millis", &self.clock.now_millis())
            .finish()
    }
}
