//! Persisted session storage configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_storage_key() -> String {
    "pulse.auth.session".into()
}

fn default_impersonation_key() -> String {
    "impersonation_original_user_id".into()
}

/// Upper bound accepted for `expiry_margin_secs`: one day.
pub const MAX_EXPIRY_MARGIN_SECS: i64 = 86_400;

/// Sessions expiring within this many seconds are not trusted for bootstrap.
const fn default_expiry_margin_secs() -> i64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Key of the `{ "currentSession": ... }` record.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Key of the durable original-user scalar used by impersonation.
    #[serde(default = "default_impersonation_key")]
    pub impersonation_key: String,

    /// Safety margin applied by the session validity predicate.
    #[serde(default = "default_expiry_margin_secs")]
    pub expiry_margin_secs: i64,

    /// Directory for the file-backed store. Empty = platform data dir.
    #[serde(default)]
    pub storage_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            impersonation_key: default_impersonation_key(),
            expiry_margin_secs: default_expiry_margin_secs(),
            storage_dir: String::new(),
        }
    }
}

impl SessionConfig {
    /// Resolve the storage directory, falling back to `<data_dir>/pulse`.
    pub fn resolved_storage_dir(&self) -> Option<PathBuf> {
        if self.storage_dir.is_empty() {
            dirs::data_dir().map(|dir| dir.join("pulse"))
        } else {
            Some(PathBuf::from(&self.storage_dir))
        }
    }
}
