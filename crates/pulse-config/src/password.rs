//! Password update configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const fn default_update_timeout_ms() -> u64 {
    8_000
}

const fn default_min_length() -> usize {
    6
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PasswordConfig {
    /// After this long the update is assumed applied server-side.
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,

    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            update_timeout_ms: default_update_timeout_ms(),
            min_length: default_min_length(),
        }
    }
}

impl PasswordConfig {
    pub const fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }
}
