use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {details}")]
    Validation { details: String },

    #[error("Tracing initialisation failed: {0}")]
    Tracing(String),
}

impl ConfigError {
    pub fn validation(details: impl Into<String>) -> Self {
        Self::Validation {
            details: details.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
