use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::KeyValueStore;
use crate::errors::{GuardError, GuardResult};

/// In-process store. Supports fault injection so failure paths can be driven.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.entries.write();
            for (key, value) in entries {
                map.insert(key.into(), value.into());
            }
        }
        store
    }

    /// Make every subsequent `get` fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set`/`remove` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Synchronous peek used by tests and the harness status output.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> GuardResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GuardError::StorageError(format!(
                "injected read failure for {}",
                key
            )));
        }
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> GuardResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GuardError::StorageError(format!(
                "injected write failure for {}",
                key
            )));
        }
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> GuardResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GuardError::StorageError(format!(
                "injected write failure for {}",
                key
            )));
        }
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_or_absent, write_or_log};

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.remove("k").await.unwrap();
        assert!(store.is_empty());
        // Removing a missing key is not an error.
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_surface_as_storage_errors() {
        let store = MemoryStore::with_entries([("k", "v")]);
        store.set_fail_reads(true);
        assert!(matches!(
            store.get("k").await,
            Err(GuardError::StorageError(_))
        ));
        assert_eq!(read_or_absent(&store, "k").await, None);

        store.set_fail_reads(false);
        store.set_fail_writes(true);
        assert!(!write_or_log(&store, "k", "other").await);
        assert_eq!(store.peek("k").as_deref(), Some("v"));
    }
}
