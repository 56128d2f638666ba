//! Error types for relay runs and configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by endpoints and the relay engine.
///
/// Every variant is fatal to the run: the engine releases its endpoints and
/// hands the error back to the caller without retrying.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Not connected to {endpoint}")]
    NotConnected { endpoint: String },

    #[error("Transfer of `{path}` failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{endpoint}: operation on `{path}` failed: {source}")]
    Endpoint {
        endpoint: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    pub(crate) fn endpoint(
        endpoint: impl Into<String>,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Endpoint {
            endpoint: endpoint.into(),
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transfer(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transfer {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur while loading a relay configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Configuration(err.to_string())
    }
}
