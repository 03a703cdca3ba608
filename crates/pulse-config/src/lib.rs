//! # pulse-config
//!
//! Layered configuration loading for Pulse using figment.
//!
//! Later sources override earlier ones:
//! 1. Built-in defaults
//! 2. `~/.config/pulse/config.toml`
//! 3. `.pulse/config.toml` in the working directory
//! 4. `PULSE_*` environment variables, `__` separating nesting levels
//!
//! `PULSE_REDIRECT__DEBOUNCE_MS` sets `redirect.debounce_ms` and
//! `PULSE_IMPERSONATION__BASE_URL` sets `impersonation.base_url`.
//!
//! # Usage
//!
//! ```no_run
//! use pulse_config::PulseConfig;
//!
//! let config = PulseConfig::load_with_dotenv().expect("config");
//! config.validate().expect("valid config");
//! println!("landing route: {}", config.redirect.landing_path);
//! ```

mod channel;
mod error;
mod impersonation;
mod password;
mod redirect;
mod session;

pub use channel::ChannelConfig;
pub use error::ConfigError;
pub use impersonation::ImpersonationConfig;
pub use password::PasswordConfig;
pub use redirect::RedirectConfig;
pub use session::{MAX_EXPIRY_MARGIN_SECS, SessionConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub impersonation: ImpersonationConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub password: PasswordConfig,
}

impl PulseConfig {
    /// Extract the layered configuration. `.env` files are not read.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` when a file or variable does not fit the schema.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::figment().extract()?)
    }

    /// [`load`](Self::load) after exporting the nearest `.env` into the process.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::export_dotenv();
        Self::load()
    }

    /// The provider chain, exposed so tests can layer extra providers.
    pub fn figment() -> Figment {
        let files = Self::user_config_path()
            .into_iter()
            .chain([PathBuf::from(".pulse/config.toml")])
            .filter(|path| path.exists());

        files
            .fold(
                Figment::from(Serialized::defaults(Self::default())),
                |figment, path| figment.merge(Toml::file(path)),
            )
            .merge(Env::prefixed("PULSE_").split("__"))
    }

    /// Reject values that would break the reconciliation invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redirect.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "redirect.debounce_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self
            .redirect
            .entry_paths
            .iter()
            .any(|path| path == &self.redirect.landing_path)
        {
            return Err(ConfigError::InvalidValue {
                field: "redirect.landing_path".into(),
                reason: format!(
                    "'{}' is also an entry path and would redirect to itself",
                    self.redirect.landing_path
                ),
            });
        }
        if self.channel.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channel.capacity".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if !(0..=MAX_EXPIRY_MARGIN_SECS).contains(&self.session.expiry_margin_secs) {
            return Err(ConfigError::InvalidValue {
                field: "session.expiry_margin_secs".into(),
                reason: format!("must be between 0 and {MAX_EXPIRY_MARGIN_SECS}"),
            });
        }
        if self.session.storage_key == self.session.impersonation_key {
            return Err(ConfigError::InvalidValue {
                field: "session.impersonation_key".into(),
                reason: "must differ from session.storage_key".into(),
            });
        }
        Ok(())
    }

    /// Require the impersonation endpoints to be configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotConfigured` when `[impersonation]` has no base URL.
    pub fn require_impersonation(&self) -> Result<&ImpersonationConfig, ConfigError> {
        if self.impersonation.is_configured() {
            Ok(&self.impersonation)
        } else {
            Err(ConfigError::NotConfigured {
                section: "impersonation".into(),
            })
        }
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pulse").join("config.toml"))
    }

    /// First `.env` found between the crate directory and the workspace root,
    /// else whatever `dotenvy` finds from the working directory. A missing file
    /// is not an error.
    fn export_dotenv() {
        let from_manifest = std::env::var_os("CARGO_MANIFEST_DIR").and_then(|dir| {
            PathBuf::from(dir)
                .ancestors()
                .take(3)
                .map(|dir| dir.join(".env"))
                .find(|path| path.is_file())
        });
        let loaded = match from_manifest {
            Some(path) => dotenvy::from_path(path),
            None => dotenvy::dotenv().map(drop),
        };
        if let Err(error) = loaded {
            if !error.not_found() {
                tracing::debug!(%error, "ignoring unreadable .env");
            }
        }
    }
}
