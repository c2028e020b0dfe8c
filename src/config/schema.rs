//! Configuration schema definitions.
//!
//! Every field is optional so that a file only needs to name what it
//! changes. Unset values resolve to the defaults in
//! [`settings`](super::settings).
//!
//! ```toml
//! [listen]
//! http = ":3128"
//! tls = ":3129"
//!
//! [whitelist]
//! path = "/etc/sni-warden/whitelist.lsv"
//! cache_key = "origin"
//!
//! [policy]
//! non_sni = "reject"
//! sniff_timeout_ms = 3000
//!
//! [ca]
//! cert = "/etc/sni-warden/ca.crt"
//! key = "/etc/sni-warden/ca.key"
//!
//! [tracker]
//! sinks = ["log", "statsd"]
//! statsd_addr = "localhost:8125"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::proxy::NonSniPolicy;
use crate::whitelist::CacheKey;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Listen addresses.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Whitelist source and caching.
    #[serde(default)]
    pub whitelist: WhitelistConfig,

    /// Connection policy.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Interception CA.
    #[serde(default)]
    pub ca: CaConfig,

    /// Event sinks.
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Values set in `other` override values in `self`. The sink list is
    /// replaced as a whole when `other` names any sinks.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.listen.merge(other.listen);
        self.whitelist.merge(other.whitelist);
        self.policy.merge(other.policy);
        self.ca.merge(other.ca);
        self.tracker.merge(other.tracker);
    }
}

fn override_with<T>(slot: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *slot = other;
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log every allowed visit.
    #[serde(default)]
    pub verbose: Option<bool>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        override_with(&mut self.verbose, other.verbose);
    }
}

/// Listen addresses, as `host:port` or `:port`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Plain HTTP proxy address.
    #[serde(default)]
    pub http: Option<String>,

    /// Raw TLS address.
    #[serde(default)]
    pub tls: Option<String>,
}

impl ListenConfig {
    fn merge(&mut self, other: ListenConfig) {
        override_with(&mut self.http, other.http);
        override_with(&mut self.tls, other.tls);
    }
}

/// Whitelist source and cache settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WhitelistConfig {
    /// Line separated pattern file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Cache keying.
    #[serde(default)]
    pub cache_key: Option<CacheKey>,
}

impl WhitelistConfig {
    fn merge(&mut self, other: WhitelistConfig) {
        override_with(&mut self.path, other.path);
        override_with(&mut self.cache_key, other.cache_key);
    }
}

/// Connection policy settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Handling of TLS clients without SNI.
    #[serde(default)]
    pub non_sni: Option<NonSniPolicy>,

    /// Time allowed for a ClientHello, in milliseconds.
    #[serde(default)]
    pub sniff_timeout_ms: Option<u64>,
}

impl PolicyConfig {
    fn merge(&mut self, other: PolicyConfig) {
        override_with(&mut self.non_sni, other.non_sni);
        override_with(&mut self.sniff_timeout_ms, other.sniff_timeout_ms);
    }
}

/// Interception CA files.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CaConfig {
    /// PEM certificate.
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// PEM private key.
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl CaConfig {
    fn merge(&mut self, other: CaConfig) {
        override_with(&mut self.cert, other.cert);
        override_with(&mut self.key, other.key);
    }
}

/// Available event sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// `tracing` at info level.
    Log,
    /// Local syslog daemon.
    Syslog,
    /// StatsD over UDP.
    Statsd,
    /// InfluxDB line protocol over UDP.
    Influx,
}

/// Event sink settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Enabled sinks.
    #[serde(default)]
    pub sinks: Vec<SinkKind>,

    /// StatsD address.
    #[serde(default)]
    pub statsd_addr: Option<String>,

    /// StatsD metric name prefix.
    #[serde(default)]
    pub statsd_prefix: Option<String>,

    /// InfluxDB UDP address.
    #[serde(default)]
    pub influx_addr: Option<String>,

    /// Largest InfluxDB datagram.
    #[serde(default)]
    pub influx_payload_size: Option<usize>,

    /// Bound on each metrics socket write, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TrackerConfig {
    fn merge(&mut self, other: TrackerConfig) {
        if !other.sinks.is_empty() {
            self.sinks = other.sinks;
        }
        override_with(&mut self.statsd_addr, other.statsd_addr);
        override_with(&mut self.statsd_prefix, other.statsd_prefix);
        override_with(&mut self.influx_addr, other.influx_addr);
        override_with(&mut self.influx_payload_size, other.influx_payload_size);
        override_with(&mut self.timeout_ms, other.timeout_ms);
    }
}
