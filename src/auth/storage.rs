//! Persistent key/value slots backing the session store.
//!
//! The session only ever touches two keys (`access_token` and
//! `refresh_token`), but backends are addressed by key name so they stay
//! agnostic of what is stored in them.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

/// Keychain service name used by `KeyringStorage`
const SERVICE_NAME: &str = "bookswap";

/// File name for `FileStorage` inside the data directory
const TOKENS_FILE: &str = "tokens.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Keychain accepted '{key}' but did not persist it")]
    NotPersisted { key: String },
}

/// String-keyed persistent storage.
///
/// Implementations must be safe to share across tasks; the session store
/// holds one behind an `Arc`.
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // Every mutation is a single map call, so a poisoned map is still consistent
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.slots().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.slots().remove(key);
        Ok(())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Stores all slots as one JSON object on disk.
///
/// Every operation re-reads the file so that several processes (or several
/// `FileStorage` values) pointed at the same path observe each other's writes.
/// Writes go to a temporary file that is renamed over the old one. A corrupt
/// file is reported by `get` but overwritten by `set` and `remove`, so a bad
/// file never locks the user out of logging in or out.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(TOKENS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Current slots for a read-modify-write; a corrupt file counts as empty
    fn read_for_update(&self) -> Result<HashMap<String, String>, StorageError> {
        match self.read_all() {
            Err(StorageError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "Discarding corrupt token file");
                Ok(HashMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, slots: &HashMap<String, String>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        if slots.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(io_err)?;
            }
            return Ok(());
        }
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(io_err)?;
        let contents = serde_json::to_string_pretty(slots).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Same directory so the rename stays on one filesystem
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(contents.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        debug!(path = %self.path.display(), slots = slots.len(), "Token file written");
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.guard();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.guard();
        let mut slots = self.read_for_update()?;
        slots.insert(key.to_string(), value.to_string());
        self.write_all(&slots)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.guard();
        let mut slots = match self.read_all() {
            Err(StorageError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "Discarding corrupt token file");
                return self.write_all(&HashMap::new());
            }
            other => other?,
        };
        if slots.remove(key).is_some() {
            self.write_all(&slots)?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// One keychain entry per slot, under the `bookswap` service.
///
/// Each write is read back through a fresh entry, so a keychain that drops
/// credentials fails the write instead of losing the session silently.
#[derive(Debug, Default)]
pub struct KeyringStorage;

impl KeyringStorage {
    pub fn new() -> Self {
        Self
    }
}

impl TokenStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = Entry::new(SERVICE_NAME, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = Entry::new(SERVICE_NAME, key)?;
        entry.set_password(value)?;

        match Entry::new(SERVICE_NAME, key)?.get_password() {
            Ok(stored) if stored == value => Ok(()),
            Ok(_) | Err(keyring::Error::NoEntry) => Err(StorageError::NotPersisted {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let entry = Entry::new(SERVICE_NAME, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
