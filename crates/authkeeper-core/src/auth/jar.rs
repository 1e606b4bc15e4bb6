//! Cookie-like key/value storage backends.
//!
//! `CookieJar` is the storage primitive the credential store sits on. It
//! has no knowledge of tokens; it only maps names to string values.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use keyring::Entry;
use tracing::debug;

use crate::error::StorageError;

/// Cookie file name in the cache directory
const COOKIE_FILE: &str = "cookies.json";

/// Service name used for keychain entries
pub const DEFAULT_KEYRING_SERVICE: &str = "authkeeper";

pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, name: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing an absent name is not an error.
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// Process-local jar; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryJar {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryJar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for MemoryJar {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(values.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        values.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        values.remove(name);
        Ok(())
    }
}

/// Jar persisted as a JSON object in `<dir>/cookies.json`.
///
/// The file is read on first access and rewritten after every mutation.
/// It is deleted once the last value is removed.
pub struct FileJar {
    path: PathBuf,
    values: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileJar {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            path: dir.join(COOKIE_FILE),
            values: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn with_values<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        match guard.as_mut() {
            Some(values) => f(values),
            None => Err(StorageError::Poisoned),
        }
    }
}

impl CookieJar for FileJar {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.with_values(|values| Ok(values.get(name).cloned()))
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.with_values(|values| {
            values.insert(name.to_string(), value.to_string());
            self.persist(values)
        })
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.with_values(|values| {
            if values.remove(name).is_some() {
                self.persist(values)?;
            }
            Ok(())
        })
    }
}

/// Jar backed by the OS keychain, one entry per name.
pub struct KeyringJar {
    service: String,
}

impl KeyringJar {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, name)?)
    }
}

impl Default for KeyringJar {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl CookieJar for KeyringJar {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.entry(name)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(name, "Keychain entry already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
