//! Syslog tracker sink.
//!
//! Events are written as JSON with an ISO8601 timestamp under the
//! `SNI_WARDEN` tag so they can be collected by the host's log pipeline.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use syslog::{Facility, Formatter3164};
use tracing::debug;

use super::error::TelemetryError;
use super::event::Event;
use super::tracker::Tracker;

/// Syslog tag for all tracker events.
pub const SYSLOG_TAG: &str = "SNI_WARDEN";

/// Event wrapper carrying the emission time.
#[derive(serde::Serialize)]
struct Timestamped<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a Event,
}

/// Tracker that writes structured JSON events to syslog.
pub struct SyslogTracker {
    /// `None` indicates a null sink (for testing).
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl SyslogTracker {
    /// Connect to the local syslog daemon over its Unix socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a sink that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Check if this is a null sink.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }

    fn render(event: &Event) -> Result<String, TelemetryError> {
        let stamped = Timestamped {
            ts: Utc::now(),
            event,
        };
        Ok(serde_json::to_string(&stamped)?)
    }
}

impl Tracker for SyslogTracker {
    fn track(&self, event: &Event) -> Result<(), TelemetryError> {
        let Some(ref writer) = self.writer else {
            return Ok(());
        };

        let json = Self::render(event)?;
        let mut writer = writer
            .lock()
            .map_err(|e| TelemetryError::SendError {
                sink: "syslog",
                message: format!("writer lock poisoned: {}", e),
            })?;
        writer.info(&json).map_err(|e| TelemetryError::SendError {
            sink: "syslog",
            message: e.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "syslog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_discards() {
        let tracker = SyslogTracker::new_null();
        assert!(tracker.is_null());
        assert!(tracker.track(&Event::new("whitelist.allow")).is_ok());
    }

    #[test]
    fn test_render_includes_timestamp_and_name() {
        let event = Event::counter("whitelist.block", [("Value", "http://evil.com")]);
        let json = SyslogTracker::render(&event).unwrap();

        assert!(json.contains("\"ts\":"));
        assert!(json.contains("\"event\":\"whitelist.block\""));
        assert!(json.contains("\"Tags\":{\"Value\":\"http://evil.com\"}"));
    }

    #[test]
    #[ignore = "Requires running syslog daemon"]
    fn test_syslog_connection() {
        let tracker = SyslogTracker::new().unwrap();
        tracker.track(&Event::new("test")).unwrap();
    }
}
