//! The whitelist store.
//!
//! Holds the ordered entry set plus a cache of positive lookups behind one
//! reader/writer lock. Readers see either the complete old entry set or the
//! complete new one; a refresh swaps entries, clears the cache and bumps the
//! generation in a single write-locked step.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::Entry;
use super::error::WhitelistError;
use super::loader::WhitelistLoader;
use crate::telemetry::{Event, Tracker};

/// Counter emitted for every allowed lookup.
pub const ALLOW_EVENT: &str = "whitelist.allow";
/// Counter emitted for every denied lookup.
pub const BLOCK_EVENT: &str = "whitelist.block";

/// How positive lookups are keyed in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheKey {
    /// The complete probe string.
    #[default]
    Full,
    /// `scheme://authority` only; any trailing path is ignored.
    Origin,
}

impl CacheKey {
    /// Derive the cache key for `candidate`.
    pub fn key_for<'a>(&self, candidate: &'a str) -> &'a str {
        match self {
            CacheKey::Full => candidate,
            CacheKey::Origin => {
                let Some(scheme_end) = candidate.find("://") else {
                    return candidate;
                };
                let authority_start = scheme_end + 3;
                match candidate[authority_start..].find('/') {
                    Some(slash) => &candidate[..authority_start + slash],
                    None => candidate,
                }
            }
        }
    }
}

#[derive(Default)]
struct StoreState {
    entries: Vec<Entry>,
    cache: HashSet<String>,
    generation: u64,
}

enum Lookup {
    Cached,
    Matched(u64),
    Missed,
}

/// Concurrent whitelist with a positive-only lookup cache.
pub struct WhitelistStore {
    state: RwLock<StoreState>,
    loader: Box<dyn WhitelistLoader>,
    tracker: Arc<dyn Tracker>,
    cache_key: CacheKey,
}

impl WhitelistStore {
    /// Create an empty store. Nothing is loaded until [`refresh`] or [`load`].
    ///
    /// [`refresh`]: WhitelistStore::refresh
    /// [`load`]: WhitelistStore::load
    pub fn new(
        loader: Box<dyn WhitelistLoader>,
        tracker: Arc<dyn Tracker>,
        cache_key: CacheKey,
    ) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            loader,
            tracker,
            cache_key,
        }
    }

    /// Create a store and perform the initial load from `loader`.
    ///
    /// Fails if the initial load fails; a proxy must not start with an
    /// unreadable or invalid whitelist.
    pub fn open(
        loader: Box<dyn WhitelistLoader>,
        tracker: Arc<dyn Tracker>,
        cache_key: CacheKey,
    ) -> Result<Self, WhitelistError> {
        let store = Self::new(loader, tracker, cache_key);
        let loaded = {
            let mut state = store.write();
            let entries = compile_all(store.loader.as_ref())?;
            let count = entries.len();
            state.entries = entries;
            count
        };
        info!(
            "Loaded {} whitelist entries from {}",
            loaded,
            store.loader.describe()
        );
        Ok(store)
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append every pattern produced by `loader`.
    ///
    /// All-or-nothing: if any pattern fails to compile, nothing is appended
    /// and the first error is returned.
    pub fn load(&self, loader: &dyn WhitelistLoader) -> Result<usize, WhitelistError> {
        let entries = compile_all(loader)?;
        let count = entries.len();
        self.write().entries.extend(entries);
        Ok(count)
    }

    /// Reload from the store's own loader.
    ///
    /// The write lock is held for the whole operation. On success the entry
    /// set is replaced, the cache cleared and the generation bumped. On
    /// failure nothing visible changes.
    pub fn refresh(&self) -> Result<usize, WhitelistError> {
        let mut state = self.write();
        match compile_all(self.loader.as_ref()) {
            Ok(entries) => {
                let count = entries.len();
                state.entries = entries;
                state.cache.clear();
                state.generation += 1;
                info!(
                    "Whitelist refreshed from {}: {} entries (generation {})",
                    self.loader.describe(),
                    count,
                    state.generation
                );
                Ok(count)
            }
            Err(e) => {
                warn!(
                    "Whitelist refresh from {} failed, keeping {} previous entries: {}",
                    self.loader.describe(),
                    state.entries.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Append one entry.
    pub fn add(&self, entry: Entry) {
        self.write().entries.push(entry);
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.read().entries.len()
    }

    /// Number of cached positive lookups.
    pub fn cache_len(&self) -> usize {
        self.read().cache.len()
    }

    /// Number of successful refreshes so far.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Whether any entry matches `candidate`.
    ///
    /// Emits exactly one allow or block event per call.
    pub fn check_string(&self, candidate: &str) -> bool {
        let key = self.cache_key.key_for(candidate);

        let lookup = {
            let state = self.read();
            if state.cache.contains(key) {
                Lookup::Cached
            } else if let Some(entry) = state.entries.iter().find(|e| e.is_match(candidate)) {
                debug!("'{}' matched whitelist entry '{}'", candidate, entry);
                Lookup::Matched(state.generation)
            } else {
                Lookup::Missed
            }
        };

        // Memoize only if no refresh happened since the scan; a positive from
        // a replaced entry set must not reach the new cache.
        if let Lookup::Matched(generation) = lookup {
            let mut state = self.write();
            if state.generation == generation {
                state.cache.insert(key.to_string());
            }
        }

        let allowed = !matches!(lookup, Lookup::Missed);
        self.track(if allowed { ALLOW_EVENT } else { BLOCK_EVENT }, candidate);
        allowed
    }

    /// Check `host` under the `http://` scheme.
    pub fn check_http_host(&self, host: &str) -> bool {
        self.check_string(&format!("http://{}", host))
    }

    /// Check `host` under the `https://` scheme.
    pub fn check_tls_host(&self, host: &str) -> bool {
        self.check_string(&format!("https://{}", host))
    }

    fn track(&self, name: &str, candidate: &str) {
        let event = Event::counter(name, [("Value", candidate)]);
        if let Err(e) = self.tracker.track(&event) {
            debug!("Failed to track {}: {}", name, e);
        }
    }
}

fn compile_all(loader: &dyn WhitelistLoader) -> Result<Vec<Entry>, WhitelistError> {
    let mut entries = Vec::new();
    loader.load(&mut |pattern| {
        entries.push(Entry::new(pattern)?);
        Ok(())
    })?;
    Ok(entries)
}
