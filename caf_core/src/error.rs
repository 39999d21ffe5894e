//! Error types for the caf_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for caf_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A store key name that is not part of the value set
    #[error("Unknown store key: {0:?} (expected \"history\" or \"totalMg\")")]
    UnknownKey(String),

    /// The persisted value set could not be read back as text or parsed
    #[error("Persisted state under {key:?} is corrupt: {source}")]
    PersistedStateCorrupt {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A dose amount that cannot be tracked
    #[error("Invalid dose: {0}")]
    InvalidDose(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
