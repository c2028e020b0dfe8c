//! Destination allow-list.
//!
//! Patterns are regular expressions matched against scheme-qualified probe
//! strings (`https://host`, `http://host`), so an entry can allow a host
//! under one scheme only. Absence of a match denies.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sni_warden::telemetry::NoopTracker;
//! use sni_warden::whitelist::{CacheKey, MemoryLoader, WhitelistStore};
//!
//! let store = WhitelistStore::open(
//!     Box::new(MemoryLoader::new([r"https://example\.com"])),
//!     Arc::new(NoopTracker),
//!     CacheKey::Full,
//! )?;
//! assert!(store.check_tls_host("example.com"));
//! assert!(!store.check_http_host("example.com"));
//! ```

mod entry;
mod error;
mod loader;
mod store;

pub use entry::Entry;
pub use error::WhitelistError;
pub use loader::{Adder, FileLoader, MemoryLoader, WhitelistLoader};
pub use store::{ALLOW_EVENT, BLOCK_EVENT, CacheKey, WhitelistStore};
