//! sni-warden: allow-list enforcing forward proxy.
//!
//! Restricts which destination hosts clients may reach, over plain HTTP and
//! over TLS, without terminating TLS for allowed destinations.
//!
//! # Security Model
//!
//! The model is **fail-closed**: a destination is reachable only if it
//! matches a whitelist pattern. A whitelist that cannot be read at startup
//! stops the proxy; one that cannot be read on reload leaves the previous
//! entries in place.
//!
//! # Architecture
//!
//! - **Whitelist**: regex entries, positive-match cache, atomic refresh
//! - **Sniff**: SNI extraction from a raw ClientHello with byte replay
//! - **Proxy**: decision engine, request filter, raw-stream adapter,
//!   tunnel and interception paths, listeners
//! - **Telemetry**: event trackers (log, syslog, StatsD, InfluxDB)
//! - **Config**: TOML configuration merged with CLI flags

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod proxy;
pub mod sniff;
pub mod telemetry;
pub mod whitelist;
