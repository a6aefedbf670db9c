use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{GuardError, GuardResult};

/// Manages filesystem paths used by the durable key-value store.
#[derive(Debug, Clone)]
pub struct GuardPaths {
    /// Root directory for guard data.
    root_dir: PathBuf,
    /// Persisted key-value store file.
    store_file: PathBuf,
    /// Directory where unreadable store files are moved aside.
    quarantine_dir: PathBuf,
}

impl GuardPaths {
    /// Default store file name used on disk.
    pub const DEFAULT_STORE_FILENAME: &'static str = "session.store";
    /// Extension appended to quarantined store files.
    pub const QUARANTINE_EXTENSION: &'static str = "store.bad";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> GuardResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(GuardError::StorageError(
                "Guard root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            store_file: root_dir.join(Self::DEFAULT_STORE_FILENAME),
            quarantine_dir: root_dir.join("quarantine"),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> GuardResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.quarantine_dir)?;
        Ok(())
    }

    pub fn store_file(&self) -> &Path {
        &self.store_file
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Move an unreadable store file out of the way so a fresh store can start.
    /// Returns the quarantined path.
    pub fn quarantine_store(&self) -> GuardResult<PathBuf> {
        if !self.store_file.exists() {
            return Err(GuardError::NotFound(
                "Store file does not exist, nothing to quarantine".to_string(),
            ));
        }

        fs::create_dir_all(&self.quarantine_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let target = self
            .quarantine_dir
            .join(format!("session_{}.{}", timestamp, Self::QUARANTINE_EXTENSION));
        fs::rename(&self.store_file, &target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_are_rooted() {
        let temp_dir = TempDir::new().unwrap();
        let paths = GuardPaths::new(temp_dir.path()).unwrap();

        assert_eq!(
            paths.store_file(),
            temp_dir.path().join(GuardPaths::DEFAULT_STORE_FILENAME)
        );
        assert_eq!(paths.quarantine_dir(), temp_dir.path().join("quarantine"));
    }

    #[test]
    fn empty_root_directory_rejected() {
        match GuardPaths::new("") {
            Err(GuardError::StorageError(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("Expected StorageError for empty root, got {:?}", other),
        }
    }

    #[test]
    fn quarantine_moves_store_file() {
        let temp_dir = TempDir::new().unwrap();
        let paths = GuardPaths::new(temp_dir.path().join("guard")).unwrap();
        paths.ensure_directories().unwrap();
        assert!(matches!(
            paths.quarantine_store(),
            Err(GuardError::NotFound(_))
        ));

        fs::write(paths.store_file(), b"garbage").unwrap();
        let moved = paths.quarantine_store().unwrap();

        assert!(!paths.store_file().exists());
        assert!(moved.starts_with(paths.quarantine_dir()));
        assert!(moved
            .to_string_lossy()
            .ends_with(GuardPaths::QUARANTINE_EXTENSION));
        assert_eq!(fs::read(moved).unwrap(), b"garbage");
    }
}
