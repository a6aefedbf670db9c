use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use blake3::Hasher as Blake3;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{GuardPaths, KeyValueStore};
use crate::errors::{GuardError, GuardResult};

const STORE_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreEnvelope {
    version: u16,
    checksum: String,
    entries: BTreeMap<String, String>,
    modified_at_unix: i64,
}

/// Durable store that keeps every entry in one checksummed JSON file.
///
/// Writes go to a sibling temp file and are renamed into place, so a crash
/// mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> GuardResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => decode_envelope(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the store under `paths`; an unreadable file is quarantined and a
    /// fresh store is started in its place.
    pub async fn open_or_recover(paths: &GuardPaths) -> GuardResult<Self> {
        paths.ensure_directories()?;
        match Self::open(paths.store_file()).await {
            Ok(store) => Ok(store),
            Err(GuardError::ValidationError(reason)) => {
                let moved = paths.quarantine_store()?;
                log::warn!(
                    "Store file rejected ({}); quarantined to {}",
                    reason,
                    moved.display()
                );
                Self::open(paths.store_file()).await
            }
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> GuardResult<()> {
        let envelope = StoreEnvelope {
            version: STORE_VERSION,
            checksum: checksum(entries)?,
            entries: entries.clone(),
            modified_at_unix: Utc::now().timestamp(),
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&serialized).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> GuardResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> GuardResult<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&entries).await {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> GuardResult<()> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&entries).await {
            entries.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }
}

fn decode_envelope(bytes: &[u8]) -> GuardResult<BTreeMap<String, String>> {
    let envelope: StoreEnvelope = serde_json::from_slice(bytes)?;
    if envelope.version != STORE_VERSION {
        return Err(GuardError::ValidationError(format!(
            "Unsupported store version {}",
            envelope.version
        )));
    }

    if checksum(&envelope.entries)? != envelope.checksum {
        return Err(GuardError::ValidationError(
            "Store integrity verification failed".to_string(),
        ));
    }

    Ok(envelope.entries)
}

fn checksum(entries: &BTreeMap<String, String>) -> GuardResult<String> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(entries)?);
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn values_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.store");

        let store = FileStore::open(&path).await.unwrap();
        store.set("SECURITY_LOCK", "true").await.unwrap();
        store.set("LAST_ACTIVE_TIMESTAMP", "1700000000000").await.unwrap();
        store.remove("LAST_ACTIVE_TIMESTAMP").await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("SECURITY_LOCK").await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(reopened.get("LAST_ACTIVE_TIMESTAMP").await.unwrap(), None);
        assert!(!path.with_extension("new").exists());
    }

    #[tokio::test]
    async fn tampered_store_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.store");
        let store = FileStore::open(&path).await.unwrap();
        store.set("SECURITY_LOCK", "true").await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"true\"", "\"nope\"")).unwrap();

        let result = FileStore::open(&path).await;
        assert!(matches!(result, Err(GuardError::ValidationError(_))));
    }

    #[tokio::test]
    async fn corrupt_store_is_quarantined() {
        let temp = TempDir::new().unwrap();
        let paths = GuardPaths::new(temp.path()).unwrap();
        paths.ensure_directories().unwrap();
        std::fs::write(paths.store_file(), b"{not json").unwrap();

        let store = FileStore::open_or_recover(&paths).await.unwrap();
        assert_eq!(store.get("SECURITY_LOCK").await.unwrap(), None);
        assert_eq!(
            std::fs::read_dir(paths.quarantine_dir()).unwrap().count(),
            1
        );
    }
}
