//! Persisted connection session.
//!
//! One JSON blob under a fixed key records whether the user was connected,
//! whether a signer was available and which relays were in use, so the next
//! run can decide whether to reconnect on its own. The store never fails
//! towards its callers: storage errors are logged, and a corrupt blob is
//! removed and treated as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::relay::normalize_relay_urls;

/// Storage key of the session blob.
pub const SESSION_KEY: &str = "satsip_connection_state";

/// Storage-layer failure. Recovered inside [`SessionStore`], never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Key/value backend for the session blob.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;
    fn remove(&self, key: &str) -> Result<(), PersistError>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// The persisted session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub is_connected: bool,
    pub has_signer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_npub: Option<String>,
    /// The identifier the user last connected to, as they typed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Unix milliseconds of the last save.
    #[serde(default)]
    pub last_connected_at: u64,
    #[serde(default)]
    pub relay_urls: Vec<String>,
}

/// Fields to change in the session. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub is_connected: Option<bool>,
    pub has_signer: Option<bool>,
    pub user_pubkey: Option<String>,
    pub user_npub: Option<String>,
    pub identifier: Option<String>,
    pub relay_urls: Option<Vec<String>>,
}

impl SessionRecord {
    fn apply(&mut self, update: SessionUpdate) {
        if let Some(v) = update.is_connected {
            self.is_connected = v;
        }
        if let Some(v) = update.has_signer {
            self.has_signer = v;
        }
        if update.user_pubkey.is_some() {
            self.user_pubkey = update.user_pubkey;
        }
        if update.user_npub.is_some() {
            self.user_npub = update.user_npub;
        }
        if update.identifier.is_some() {
            self.identifier = update.identifier;
        }
        if let Some(urls) = update.relay_urls {
            self.relay_urls = urls;
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Reads and writes the session blob.
pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
        }
    }

    /// A store backed by `<dir>/satsip_connection_state.json`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileStorage::new(dir))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Merge `update` into the stored record and write it back.
    pub fn save(&self, update: SessionUpdate) {
        let mut record = self.load().unwrap_or_default();
        record.apply(update);
        self.replace(record);
    }

    /// Overwrite the stored record. Fields left `None` in `record` are
    /// dropped rather than inherited.
    pub fn replace(&self, mut record: SessionRecord) {
        record.relay_urls = normalize_relay_urls(&record.relay_urls);
        record.last_connected_at = now_millis();

        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize session");
                return;
            }
        };
        if let Err(e) = self.storage.set(SESSION_KEY, &json) {
            warn!(error = %e, "Failed to persist session");
        }
    }

    /// The stored record, if present and readable.
    pub fn load(&self) -> Option<SessionRecord> {
        let raw = match self.storage.get(SESSION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Corrupt session record, clearing");
                self.clear();
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(SESSION_KEY) {
            warn!(error = %e, "Failed to clear session");
        }
    }

    /// Mirror the live connection flag into an existing record. Does nothing
    /// when no session is stored.
    pub fn update_connection_state(&self, is_connected: bool, relay_count: usize) {
        if self.load().is_none() {
            return;
        }
        debug!(is_connected, relay_count, "Mirroring connection state");
        self.save(SessionUpdate {
            is_connected: Some(is_connected),
            ..SessionUpdate::default()
        });
    }

    /// Reconnect on start-up only when a session exists and a signer was
    /// available for it.
    pub fn should_auto_reconnect(&self) -> bool {
        self.load().is_some_and(|record| record.has_signer)
    }
}
