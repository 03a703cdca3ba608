//! Durable key-value storage shared by every tab of one origin, and the
//! session record accessor built on top of it.
//!
//! Layout:
//! - `<storage_key>` holds `{"currentSession": Session}`
//! - `<impersonation_key>` holds the original user id as a bare string
//!
//! Writes are last-writer-wins with no locking. The identity provider stays
//! the source of truth; these records are an advisory cache.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use pulse_config::SessionConfig;
use pulse_core::Session;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `AuthError::Store` if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// # Errors
    ///
    /// Returns `AuthError::Store` if the value cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if an existing value cannot be removed.
    fn remove(&self, key: &str) -> Result<(), AuthError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Process-local store. Clones share the same entries, like the storage of
/// one browser origin.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// One file per key under `dir`. The directory is created `0700` and files
/// are written `0600` on Unix since they hold bearer tokens.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the configured directory (or `<data_dir>/pulse`).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if no data directory can be resolved.
    pub fn from_config(config: &SessionConfig) -> Result<Self, AuthError> {
        config
            .resolved_storage_dir()
            .map(Self::new)
            .ok_or_else(|| AuthError::Store("no data directory available for session storage".into()))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(file_name)
    }

    fn ensure_dir(&self) -> Result<(), AuthError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| AuthError::Store(format!("mkdir {}: {e}", self.dir.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700)) {
                tracing::warn!("failed to chmod 0700 {}: {e}", self.dir.display());
            }
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Store(format!("read {}: {e}", path.display()))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.ensure_dir()?;
        let path = self.path_for(key);
        fs::write(&path, value)
            .map_err(|e| AuthError::Store(format!("write {}: {e}", path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::Store(format!("chmod {}: {e}", path.display())))?;
        }

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Store(format!("delete {}: {e}", path.display()))),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRecord {
    #[serde(default)]
    current_session: Option<Session>,
}

/// Accessor for the persisted session record and the impersonation key.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
    session_key: String,
    impersonation_key: String,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session_key", &self.session_key)
            .field("impersonation_key", &self.impersonation_key)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, config: &SessionConfig) -> Self {
        Self {
            backend,
            session_key: config.storage_key.clone(),
            impersonation_key: config.impersonation_key.clone(),
        }
    }

    /// Read the persisted session. Missing, unreadable and corrupt records
    /// all read as `None`.
    #[must_use]
    pub fn load_session(&self) -> Option<Session> {
        let raw = match self.backend.get(&self.session_key) {
            Ok(raw) => raw?,
            Err(error) => {
                tracing::warn!(%error, key = %self.session_key, "session record unreadable");
                return None;
            }
        };
        match serde_json::from_str::<PersistedRecord>(&raw) {
            Ok(record) => record.current_session,
            Err(error) => {
                tracing::warn!(%error, key = %self.session_key, "ignoring corrupt session record");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Returns `AuthError::Store` if the record cannot be encoded or written.
    pub fn save_session(&self, session: &Session) -> Result<(), AuthError> {
        let record = PersistedRecord {
            current_session: Some(session.clone()),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| AuthError::Store(format!("encode session record: {e}")))?;
        self.backend.set(&self.session_key, &raw)
    }

    /// # Errors
    ///
    /// Returns `AuthError::Store` if the record cannot be removed.
    pub fn clear_session(&self) -> Result<(), AuthError> {
        self.backend.remove(&self.session_key)
    }

    /// Original user id of an active impersonation, if any. Blank reads as `None`.
    #[must_use]
    pub fn load_original_user_id(&self) -> Option<String> {
        match self.backend.get(&self.impersonation_key) {
            Ok(value) => value
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            Err(error) => {
                tracing::warn!(%error, key = %self.impersonation_key, "impersonation key unreadable");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Returns `AuthError::Store` if the key cannot be written.
    pub fn save_original_user_id(&self, user_id: &str) -> Result<(), AuthError> {
        self.backend.set(&self.impersonation_key, user_id)
    }

    /// # Errors
    ///
    /// Returns `AuthError::Store` if the key cannot be removed.
    pub fn clear_original_user_id(&self) -> Result<(), AuthError> {
        self.backend.remove(&self.impersonation_key)
    }
}
