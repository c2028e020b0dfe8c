//! Whitelist error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or reloading the whitelist.
#[derive(Debug, Error)]
pub enum WhitelistError {
    /// A pattern failed to compile.
    #[error("Invalid whitelist pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending configuration string.
        pattern: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// The whitelist source could not be read.
    #[error("Failed to read whitelist {path}: {source}")]
    Read {
        /// Path of the whitelist file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
