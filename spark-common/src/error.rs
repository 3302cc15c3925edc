use std::path::PathBuf;

use thiserror::Error;

/// Errors shared by the SPARK crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unusable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration file could not be read.
    #[error("Cannot read config file '{}': {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR encoding error: {0}")]
    Cbor(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl<E: std::fmt::Debug> From<ciborium::ser::Error<E>> for Error {
    fn from(e: ciborium::ser::Error<E>) -> Self {
        Self::Cbor(e.to_string())
    }
}

impl<E: std::fmt::Debug> From<ciborium::de::Error<E>> for Error {
    fn from(e: ciborium::de::Error<E>) -> Self {
        Self::Cbor(e.to_string())
    }
}

/// Result type alias using the common [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
