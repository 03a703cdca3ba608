//! Cross-tab channel configuration.

use serde::{Deserialize, Serialize};

const fn default_enabled() -> bool {
    true
}

fn default_name() -> String {
    "pulse-session-sync".into()
}

/// Per-receiver buffer; slower receivers drop the oldest messages.
const fn default_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Disable to run every tab in single-tab mode.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Logical channel name, one per application origin.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            name: default_name(),
            capacity: default_capacity(),
        }
    }
}
