//! Configuration system for sni-warden.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/sni-warden/config.toml` (optional)
//! 2. Additional config file (via `--config` flag)
//! 3. CLI flags (highest priority)
//!
//! No file is required: every value has a default matching the classic
//! command line (`:3128`, `:3129`, `whitelist.lsv`, `ca.crt`, `ca.key`,
//! StatsD at `localhost:8125`).
//!
//! # Merge Behavior
//!
//! - **Scalars** are **overridden** by any later source that sets them
//! - **The sink list** is **replaced** as a whole

mod error;
mod loader;
mod schema;
mod settings;

pub use error::ConfigError;
pub use loader::{ConfigLoader, SYSTEM_CONFIG_PATH};
pub use schema::{
    CaConfig, Config, GeneralConfig, ListenConfig, PolicyConfig, SinkKind, TrackerConfig,
    WhitelistConfig,
};
pub use settings::{TrackerSettings, parse_listen_addr};
