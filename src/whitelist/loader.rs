//! Whitelist sources.
//!
//! A [`WhitelistLoader`] produces patterns one at a time through an adder
//! callback. The store decides what to do with each pattern; the loader only
//! knows where they come from.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::WhitelistError;

/// Callback a loader feeds each pattern into.
///
/// Returning an error aborts the load.
pub type Adder<'a> = dyn FnMut(&str) -> Result<(), WhitelistError> + 'a;

/// A source of whitelist patterns.
pub trait WhitelistLoader: Send + Sync {
    /// Feed every pattern to `adder`, stopping at the first error.
    fn load(&self, adder: &mut Adder<'_>) -> Result<(), WhitelistError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Patterns held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    patterns: Vec<String>,
}

impl MemoryLoader {
    /// Create a loader over `patterns`.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

impl WhitelistLoader for MemoryLoader {
    fn load(&self, adder: &mut Adder<'_>) -> Result<(), WhitelistError> {
        for pattern in &self.patterns {
            adder(pattern)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} patterns)", self.patterns.len())
    }
}

/// Patterns read from a line-separated file, one per line.
///
/// Blank lines are skipped. The file is read afresh on every load so a
/// refresh picks up edits.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
}

impl FileLoader {
    /// Create a loader for `path`. The file is not opened until [`load`].
    ///
    /// [`load`]: WhitelistLoader::load
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WhitelistLoader for FileLoader {
    fn load(&self, adder: &mut Adder<'_>) -> Result<(), WhitelistError> {
        let content = fs::read_to_string(&self.path).map_err(|source| WhitelistError::Read {
            path: self.path.clone(),
            source,
        })?;

        for line in content.lines() {
            let pattern = line.trim_end_matches('\r');
            if pattern.trim().is_empty() {
                continue;
            }
            adder(pattern)?;
            debug!("Added: {}", pattern);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
