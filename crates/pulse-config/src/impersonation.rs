//! Impersonation endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImpersonationConfig {
    /// Base URL serving `/api/impersonate` and `/api/stop-impersonate`.
    #[serde(default)]
    pub base_url: String,

    /// Client-side timeout for either exchange.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ImpersonationConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ImpersonationConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_not_configured() {
        let config = ImpersonationConfig::default();
        assert!(!config.is_configured());
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn configured_when_base_url_set() {
        let config = ImpersonationConfig {
            base_url: "https://app.example.com".into(),
            ..Default::default()
        };
        assert!(config.is_configured());
    }
}
