use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A TOML file or `PULSE_*` variable could not be parsed into the schema.
    #[error("failed to load pulse configuration: {0}")]
    Load(#[from] figment::Error),

    /// An optional section was needed but its required fields are empty.
    #[error("[{section}] is required here but has no endpoint configured")]
    NotConfigured { section: String },

    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
