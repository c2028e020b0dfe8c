//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file named with `--config` does not exist.
    #[error("Config file {path} not found")]
    Missing {
        /// The requested file.
        path: PathBuf,
    },

    /// A config file exists but could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// The unreadable file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid TOML for the schema.
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// The TOML error, with line and column.
        #[source]
        source: toml::de::Error,
    },

    /// A value parsed but cannot be used.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Dotted name of the setting, e.g. `listen.http`.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}
