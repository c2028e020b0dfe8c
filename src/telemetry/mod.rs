//! Tracker events and their sinks.
//!
//! The proxy reports what it does (allowed and blocked lookups, served
//! connections and their durations) as [`Event`]s handed to a [`Tracker`].
//! Sinks are independent of one another and composed with
//! [`CompositeTracker`].
//!
//! # Architecture
//!
//! - **Tracker events**: metrics-shaped records delivered to the configured
//!   sinks (log, syslog, StatsD, InfluxDB).
//! - **Diagnostic logging** (tracing): goes to stderr via `tracing`, with
//!   per-decision audit records on the `sni_warden::audit` target.
//!
//! A failing sink is logged and otherwise ignored; it never affects the
//! connection that produced the event.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use sni_warden::telemetry::{CompositeTracker, Event, LogTracker, Tracker};
//!
//! let tracker = CompositeTracker::new(vec![Arc::new(LogTracker)]);
//! tracker.track(&Event::counter("whitelist.allow", [("Value", "https://example.com")]))?;
//! ```

mod error;
mod event;
mod influx;
mod statsd;
mod syslog;
mod tracker;

pub use error::TelemetryError;
pub use event::{Event, HOST, MetricKind, PROTOCOL, PropertyValue, TAGS, TYPE, URL, VALUE};
pub use influx::{DEFAULT_PAYLOAD_SIZE, InfluxTracker};
pub use statsd::{DEFAULT_PREFIX, StatsdTracker};
pub use syslog::{SYSLOG_TAG, SyslogTracker};
pub use tracker::{
    CompositeTracker, LogTracker, NoopTracker, RecordingTracker, ServeTimer, Tracker,
};
