//! Redirect guard configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum spacing between two navigations issued by the guard.
const fn default_debounce_ms() -> u64 {
    500
}

fn default_landing_path() -> String {
    "/dashboard".into()
}

fn default_entry_paths() -> Vec<String> {
    vec!["/".into(), "/login".into()]
}

fn default_reset_password_path() -> String {
    "/reset-password".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Authenticated landing route.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,

    /// Paths a signed-in tab is moved away from.
    #[serde(default = "default_entry_paths")]
    pub entry_paths: Vec<String>,

    /// Never redirected, even with a session (recovery links sign the user in).
    #[serde(default = "default_reset_password_path")]
    pub reset_password_path: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            landing_path: default_landing_path(),
            entry_paths: default_entry_paths(),
            reset_password_path: default_reset_password_path(),
        }
    }
}

impl RedirectConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
