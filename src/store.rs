/// Persistence of the last connection across restarts.
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// The two persisted entries. They are always written and cleared together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub selected_account: Option<Address>,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<PersistedSession, StoreError>;

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<PersistedSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<PersistedSession, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        *inner = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.save(&PersistedSession::default())
    }
}

/// JSON file store. A missing file reads as an empty session.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<PersistedSession, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(PersistedSession::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // replaced atomically via rename
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_clear_resets_both_entries() {
        let store = MemoryStore::with_session(PersistedSession {
            connected: true,
            selected_account: Some(Address::from_low_u64_be(0xabc)),
        });
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), PersistedSession::default());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet").join("session.json");
        let session = PersistedSession {
            connected: true,
            selected_account: Some(Address::from_low_u64_be(0xabc)),
        };

        FileStore::new(&path).save(&session).unwrap();
        assert_eq!(FileStore::new(&path).load().unwrap(), session);

        let store = FileStore::new(&path);
        store.clear().unwrap();
        assert!(!path.exists());
        assert_eq!(store.load().unwrap(), PersistedSession::default());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileStore::new(&path).load(),
            Err(StoreError::Serialization(_))
        ));
    }
}
