//! Resolution of a merged [`Config`] into runtime settings.
//!
//! Defaults live here: anything a config file or flag leaves unset takes
//! the value below.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::error::ConfigError;
use super::schema::{Config, SinkKind};
use crate::proxy::ProxySettings;
use crate::telemetry::{
    CompositeTracker, DEFAULT_PAYLOAD_SIZE, DEFAULT_PREFIX, InfluxTracker, LogTracker,
    StatsdTracker, SyslogTracker, Tracker,
};

/// Default plain HTTP listen address.
pub const DEFAULT_HTTP_ADDR: &str = ":3128";
/// Default raw TLS listen address.
pub const DEFAULT_TLS_ADDR: &str = ":3129";
/// Default whitelist file.
pub const DEFAULT_WHITELIST_PATH: &str = "whitelist.lsv";
/// Default CA certificate file.
pub const DEFAULT_CA_CERT: &str = "ca.crt";
/// Default CA key file.
pub const DEFAULT_CA_KEY: &str = "ca.key";
/// Default StatsD address.
pub const DEFAULT_STATSD_ADDR: &str = "localhost:8125";
/// Default InfluxDB UDP address.
pub const DEFAULT_INFLUX_ADDR: &str = "localhost:8089";
/// Default bound on metrics socket writes.
pub const DEFAULT_TRACKER_TIMEOUT_MS: u64 = 250;
/// Default ClientHello timeout.
pub const DEFAULT_SNIFF_TIMEOUT_MS: u64 = 5000;

/// Resolved event sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Enabled sinks, in order.
    pub sinks: Vec<SinkKind>,
    /// StatsD address.
    pub statsd_addr: String,
    /// StatsD metric name prefix.
    pub statsd_prefix: String,
    /// InfluxDB UDP address.
    pub influx_addr: String,
    /// Largest InfluxDB datagram.
    pub influx_payload_size: usize,
    /// Bound on each metrics socket write.
    pub timeout: Duration,
}

impl TrackerSettings {
    /// Build the configured sinks behind one fan-out tracker.
    ///
    /// A sink that cannot be opened is logged and left out; the proxy must
    /// run without metrics rather than not at all.
    pub fn build(&self) -> Arc<dyn Tracker> {
        let mut composite = CompositeTracker::new(Vec::new());
        for sink in &self.sinks {
            let tracker: Result<Arc<dyn Tracker>, _> = match sink {
                SinkKind::Log => Ok(Arc::new(LogTracker)),
                SinkKind::Syslog => SyslogTracker::new().map(|t| Arc::new(t) as Arc<dyn Tracker>),
                SinkKind::Statsd => {
                    StatsdTracker::new(&self.statsd_addr, &self.statsd_prefix, self.timeout)
                        .map(|t| Arc::new(t) as Arc<dyn Tracker>)
                }
                SinkKind::Influx => {
                    InfluxTracker::new(&self.influx_addr, self.influx_payload_size, self.timeout)
                        .map(|t| Arc::new(t) as Arc<dyn Tracker>)
                }
            };
            match tracker {
                Ok(tracker) => {
                    info!("Tracking events to {}", tracker.name());
                    composite.push(tracker);
                }
                Err(e) => warn!("Event sink {:?} unavailable: {}", sink, e),
            }
        }
        Arc::new(composite)
    }
}

impl Config {
    /// Settings for the listeners, decision engine and filter.
    pub fn proxy_settings(&self) -> Result<ProxySettings, ConfigError> {
        let http = self.listen.http.as_deref().unwrap_or(DEFAULT_HTTP_ADDR);
        let tls = self.listen.tls.as_deref().unwrap_or(DEFAULT_TLS_ADDR);
        Ok(ProxySettings {
            http_addr: parse_listen_addr("listen.http", http)?,
            tls_addr: parse_listen_addr("listen.tls", tls)?,
            non_sni_policy: self.policy.non_sni.unwrap_or_default(),
            cache_key: self.whitelist.cache_key.unwrap_or_default(),
            sniff_timeout: positive_millis(
                "policy.sniff_timeout_ms",
                self.policy.sniff_timeout_ms.unwrap_or(DEFAULT_SNIFF_TIMEOUT_MS),
            )?,
            verbose: self.general.verbose.unwrap_or(false),
        })
    }

    /// The whitelist file.
    pub fn whitelist_path(&self) -> PathBuf {
        self.whitelist
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WHITELIST_PATH))
    }

    /// The CA certificate and key files.
    pub fn ca_paths(&self) -> (PathBuf, PathBuf) {
        (
            self.ca
                .cert
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_CERT)),
            self.ca
                .key
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_KEY)),
        )
    }

    /// Event sink settings. StatsD alone when no sink is configured.
    pub fn tracker_settings(&self) -> Result<TrackerSettings, ConfigError> {
        let tracker = &self.tracker;
        Ok(TrackerSettings {
            sinks: if tracker.sinks.is_empty() {
                vec![SinkKind::Statsd]
            } else {
                tracker.sinks.clone()
            },
            statsd_addr: tracker
                .statsd_addr
                .clone()
                .unwrap_or_else(|| DEFAULT_STATSD_ADDR.to_string()),
            statsd_prefix: tracker
                .statsd_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            influx_addr: tracker
                .influx_addr
                .clone()
                .unwrap_or_else(|| DEFAULT_INFLUX_ADDR.to_string()),
            influx_payload_size: tracker.influx_payload_size.unwrap_or(DEFAULT_PAYLOAD_SIZE),
            timeout: positive_millis(
                "tracker.timeout_ms",
                tracker.timeout_ms.unwrap_or(DEFAULT_TRACKER_TIMEOUT_MS),
            )?,
        })
    }
}

/// A timeout in milliseconds; zero would expire immediately.
fn positive_millis(field: &str, millis: u64) -> Result<Duration, ConfigError> {
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(millis))
}

/// Parse `host:port`, accepting `:port` for all interfaces.
pub fn parse_listen_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    };

    let value = value.trim();
    let full = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    if let Ok(addr) = full.parse::<SocketAddr>() {
        return Ok(addr);
    }
    full.to_socket_addrs()
        .map_err(|e| invalid(format!("'{}': {}", value, e)))?
        .next()
        .ok_or_else(|| invalid(format!("'{}' resolves to no address", value)))
}
