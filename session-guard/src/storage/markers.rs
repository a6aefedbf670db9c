use super::{keys, KeyValueStore, FLAG_TRUE};

/// Presence-only view of the authenticated-user marker written by the sign-in flow.
///
/// The password is never compared here; only its presence matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMarker {
    pub email_present: bool,
    pub password_present: bool,
}

impl AuthMarker {
    /// Read both marker keys. A failed read counts as absent unless `fail_closed`.
    pub async fn load(store: &dyn KeyValueStore, fail_closed: bool) -> Self {
        Self {
            email_present: presence(store, keys::LAST_USER_EMAIL, fail_closed).await,
            password_present: presence(store, keys::USER_PASSWORD, fail_closed).await,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.email_present && self.password_present
    }
}

/// Snapshot of the persisted flags the guard hydrates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoredFlags {
    pub authenticated: bool,
    pub lock_flag: bool,
    pub biometric_enabled: bool,
}

impl StoredFlags {
    pub async fn load(store: &dyn KeyValueStore, fail_closed: bool) -> Self {
        let authenticated = AuthMarker::load(store, fail_closed).await.is_authenticated();
        let lock_flag = read_lock_flag(store, fail_closed).await;
        let biometric_enabled = read_biometric_enabled(store).await;
        Self {
            authenticated,
            lock_flag,
            biometric_enabled,
        }
    }
}

/// `SECURITY_LOCK == "true"`. A failed read is "not locked" unless `fail_closed`.
pub async fn read_lock_flag(store: &dyn KeyValueStore, fail_closed: bool) -> bool {
    match store.get(keys::SECURITY_LOCK).await {
        Ok(value) => value.as_deref() == Some(FLAG_TRUE),
        Err(err) => {
            log::warn!(
                "Lock flag unreadable, assuming {}: {}",
                if fail_closed { "locked" } else { "unlocked" },
                err
            );
            fail_closed
        }
    }
}

/// `BIOMETRIC_ENABLED == "true"`. Only selects the offered credential, so
/// a failed read always falls back to PIN-only.
pub async fn read_biometric_enabled(store: &dyn KeyValueStore) -> bool {
    match store.get(keys::BIOMETRIC_ENABLED).await {
        Ok(value) => value.as_deref() == Some(FLAG_TRUE),
        Err(err) => {
            log::warn!("Biometric flag unreadable, offering PIN only: {}", err);
            false
        }
    }
}

async fn presence(store: &dyn KeyValueStore, key: &str, fail_closed: bool) -> bool {
    match store.get(key).await {
        Ok(value) => value.map(|v| !v.trim().is_empty()).unwrap_or(false),
        Err(err) => {
            log::warn!("Auth marker {} unreadable: {}", key, err);
            fail_closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn signed_in() -> MemoryStore {
        MemoryStore::with_entries([
            (keys::LAST_USER_EMAIL, "ada@example.com"),
            (keys::USER_PASSWORD, "hunter2"),
        ])
    }

    #[tokio::test]
    async fn both_parts_required() {
        assert!(AuthMarker::load(&signed_in(), false)
            .await
            .is_authenticated());

        let email_only = MemoryStore::with_entries([(keys::LAST_USER_EMAIL, "ada@example.com")]);
        assert!(!AuthMarker::load(&email_only, false)
            .await
            .is_authenticated());

        let blank = MemoryStore::with_entries([
            (keys::LAST_USER_EMAIL, "ada@example.com"),
            (keys::USER_PASSWORD, "  "),
        ]);
        assert!(!AuthMarker::load(&blank, false).await.is_authenticated());
    }

    #[tokio::test]
    async fn read_failures_follow_posture() {
        let store = signed_in();
        store.set_fail_reads(true);

        let open = StoredFlags::load(&store, false).await;
        assert_eq!(open, StoredFlags::default());

        let closed = StoredFlags::load(&store, true).await;
        assert!(closed.authenticated);
        assert!(closed.lock_flag);
        assert!(!closed.biometric_enabled);
    }

    #[tokio::test]
    async fn only_literal_true_counts() {
        let store = MemoryStore::with_entries([
            (keys::SECURITY_LOCK, "TRUE"),
            (keys::BIOMETRIC_ENABLED, "true"),
        ]);
        let flags = StoredFlags::load(&store, false).await;
        assert!(!flags.lock_flag);
        assert!(flags.biometric_enabled);
    }
}
