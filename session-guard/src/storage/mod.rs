//! Key-value store boundary shared by every lock component.
//!
//! The store is owned by the host platform; values are opaque strings.

pub mod file;
pub mod markers;
pub mod memory;
pub mod paths;

use async_trait::async_trait;

use crate::errors::GuardResult;

pub use file::FileStore;
pub use markers::{AuthMarker, StoredFlags};
pub use memory::MemoryStore;
pub use paths::GuardPaths;

/// Keys read and written by the guard.
pub mod keys {
    /// Epoch-millisecond string of the last foreground heartbeat.
    pub const LAST_ACTIVE_TIMESTAMP: &str = "LAST_ACTIVE_TIMESTAMP";
    /// `"true"` while the unlock gate must be shown; absent otherwise.
    pub const SECURITY_LOCK: &str = "SECURITY_LOCK";
    pub const LAST_USER_EMAIL: &str = "LAST_USER_EMAIL";
    pub const USER_PASSWORD: &str = "USER_PASSWORD";
    pub const BIOMETRIC_ENABLED: &str = "BIOMETRIC_ENABLED";
    /// Argon2id PHC string of the unlock PIN.
    pub const APP_PIN_HASH: &str = "APP_PIN_HASH";
}

pub const FLAG_TRUE: &str = "true";
pub const FLAG_FALSE: &str = "false";

/// Asynchronous string-keyed store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> GuardResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> GuardResult<()>;
    async fn remove(&self, key: &str) -> GuardResult<()>;
}

/// Read `key`, logging a failure and treating it as absent.
pub async fn read_or_absent(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Store read of {} failed, treating as absent: {}", key, err);
            None
        }
    }
}

/// Write `key`, logging a failure. Returns whether the write landed.
pub async fn write_or_log(store: &dyn KeyValueStore, key: &str, value: &str) -> bool {
    match store.set(key, value).await {
        Ok(()) => true,
        Err(err) => {
            log::warn!("Store write of {} failed: {}", key, err);
            false
        }
    }
}
