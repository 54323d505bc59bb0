//! Durable client-side key/value storage and the auth token slot kept in it.

use crate::error::StorageError;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Fixed key under which the bearer token is persisted.
pub const TOKEN_KEY: &str = "token";

/// Single-slot holder for the bearer token.
///
/// `load` is called on every outbound request, so a token written by one
/// part of the program is visible to the next request without any explicit
/// propagation.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, token: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// String map persisted as one JSON file. Every write replaces the file via
/// a temp file and rename.
pub struct LocalStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalStorage {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (mut items, _) = self.read_for_write()?;
        items.insert(key.to_string(), value.to_string());
        self.write_all(&items)
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (mut items, discarded) = self.read_for_write()?;
        if items.remove(key).is_none() && !discarded {
            return Ok(());
        }
        self.write_all(&items)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// A corrupt file is replaced on the next write instead of blocking it;
    /// the flag reports whether its contents were discarded.
    fn read_for_write(&self) -> Result<(BTreeMap<String, String>, bool), StorageError> {
        match self.read_all() {
            Ok(items) => Ok((items, false)),
            Err(err @ StorageError::Corrupt { .. }) => {
                tracing::warn!(error = %err, "discarding corrupt local storage");
                Ok((BTreeMap::new(), true))
            }
            Err(err) => Err(err),
        }
    }

    fn write_all(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StorageError::Io { path, source }
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let encoded = serde_json::to_vec_pretty(items).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))
    }
}

impl TokenStore for LocalStorage {
    fn load(&self) -> Option<String> {
        match self.get_item(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "unable to read stored token; treating as absent");
                None
            }
        }
    }

    fn store(&self, token: &str) -> Result<(), StorageError> {
        self.set_item(TOKEN_KEY, token)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.remove_item(TOKEN_KEY)
    }
}

/// In-memory token slot for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store(&self, token: &str) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
