//! StatsD tracker sink over UDP.
//!
//! Each event becomes one datagram `<prefix><name>[,tag=value...]:<value>|<type>`.
//! Tags use the InfluxDB-style suffix understood by Telegraf's statsd input.

use std::net::UdpSocket;
use std::time::Duration;

use super::error::TelemetryError;
use super::event::{Event, MetricKind, PropertyValue, VALUE};
use super::tracker::Tracker;

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "smykowski.";

/// Tracker that writes StatsD datagrams.
pub struct StatsdTracker {
    socket: UdpSocket,
    addr: String,
    prefix: String,
}

impl StatsdTracker {
    /// Open a UDP socket towards `addr` (e.g. `localhost:8125`).
    ///
    /// `timeout` bounds each send so a slow sink cannot stall a connection.
    pub fn new(addr: &str, prefix: &str, timeout: Duration) -> Result<Self, TelemetryError> {
        let socket_err = |source| TelemetryError::Socket {
            addr: addr.to_string(),
            source,
        };
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(socket_err)?;
        socket.connect(addr).map_err(socket_err)?;
        socket.set_write_timeout(Some(timeout)).map_err(socket_err)?;

        Ok(Self {
            socket,
            addr: addr.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Sink address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Encode `event`, or `None` if it has no StatsD representation.
    pub fn encode(&self, event: &Event) -> Option<String> {
        let suffix = match event.kind()? {
            MetricKind::Timer => "ms",
            MetricKind::Counter => "c",
            MetricKind::Gauge => "g",
            MetricKind::Set => "s",
        };
        let value = match event.property(VALUE)? {
            PropertyValue::Integer(v) => v.to_string(),
            PropertyValue::Duration(d) => d.as_millis().to_string(),
            PropertyValue::Text(s) => sanitize(s),
            PropertyValue::Tags(_) => return None,
        };

        let mut line = format!("{}{}", self.prefix, sanitize(event.name()));
        if let Some(tags) = event.tags() {
            for (k, v) in tags {
                line.push(',');
                line.push_str(&sanitize(k));
                line.push('=');
                line.push_str(&sanitize(v));
            }
        }
        line.push(':');
        line.push_str(&value);
        line.push('|');
        line.push_str(suffix);
        Some(line)
    }
}

/// Replace characters that are structural in the StatsD wire format.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ':' | '|' | ',' | '=' | '@' | '#' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

impl Tracker for StatsdTracker {
    fn track(&self, event: &Event) -> Result<(), TelemetryError> {
        let Some(line) = self.encode(event) else {
            return Ok(());
        };
        self.socket
            .send(line.as_bytes())
            .map(|_| ())
            .map_err(|e| TelemetryError::SendError {
                sink: "statsd",
                message: e.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "statsd"
    }
}
