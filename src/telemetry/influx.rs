//! InfluxDB line-protocol tracker sink over UDP.
//!
//! One point per event: the event name is the measurement, the tag set maps
//! to tags and every other property becomes a field. Durations are written as
//! integer milliseconds.

use std::net::UdpSocket;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::TelemetryError;
use super::event::{Event, PropertyValue};
use super::tracker::Tracker;

/// Default maximum datagram size, matching the InfluxDB UDP listener.
pub const DEFAULT_PAYLOAD_SIZE: usize = 512;

/// Tracker that writes line-protocol points to an InfluxDB UDP listener.
pub struct InfluxTracker {
    addr: String,
    payload_size: usize,
    timeout: Duration,
    socket: Mutex<Option<UdpSocket>>,
}

impl InfluxTracker {
    /// Create a tracker sending to `addr`.
    ///
    /// The socket is opened eagerly so configuration errors surface at
    /// startup; after a send failure it is re-opened on the next event.
    pub fn new(addr: &str, payload_size: usize, timeout: Duration) -> Result<Self, TelemetryError> {
        let socket = open_socket(addr, timeout)?;
        Ok(Self {
            addr: addr.to_string(),
            payload_size,
            timeout,
            socket: Mutex::new(Some(socket)),
        })
    }

    /// Encode `event` as one line, or `None` if it carries no fields.
    pub fn encode(event: &Event, timestamp_ns: i64) -> Option<String> {
        let mut line = escape(event.name(), &[',', ' ']);
        if let Some(tags) = event.tags() {
            for (k, v) in tags {
                if v.is_empty() {
                    continue;
                }
                line.push(',');
                line.push_str(&escape(k, &[',', ' ', '=']));
                line.push('=');
                line.push_str(&escape(v, &[',', ' ', '=']));
            }
        }

        let fields: Vec<String> = event
            .fields()
            .filter_map(|(k, v)| {
                let value = match v {
                    PropertyValue::Integer(i) => format!("{}i", i),
                    PropertyValue::Duration(d) => format!("{}i", d.as_millis()),
                    PropertyValue::Text(s) => {
                        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
                    }
                    PropertyValue::Tags(_) => return None,
                };
                Some(format!("{}={}", escape(k, &[',', ' ', '=']), value))
            })
            .collect();
        if fields.is_empty() {
            return None;
        }

        line.push(' ');
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&timestamp_ns.to_string());
        Some(line)
    }
}

fn open_socket(addr: &str, timeout: Duration) -> Result<UdpSocket, TelemetryError> {
    let socket_err = |source| TelemetryError::Socket {
        addr: addr.to_string(),
        source,
    };
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(socket_err)?;
    socket.connect(addr).map_err(socket_err)?;
    socket.set_write_timeout(Some(timeout)).map_err(socket_err)?;
    Ok(socket)
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Tracker for InfluxTracker {
    fn track(&self, event: &Event) -> Result<(), TelemetryError> {
        let ts = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let Some(line) = Self::encode(event, ts) else {
            debug!("Event {} has no fields, skipping", event.name());
            return Ok(());
        };
        if line.len() > self.payload_size {
            return Err(TelemetryError::PayloadTooLarge {
                size: line.len(),
                limit: self.payload_size,
            });
        }

        let mut guard = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(open_socket(&self.addr, self.timeout)?);
        }
        let Some(socket) = guard.as_ref() else {
            return Ok(());
        };

        if let Err(e) = socket.send(line.as_bytes()) {
            warn!("InfluxDB send to {} failed, reconnecting next time: {}", self.addr, e);
            *guard = None;
            return Err(TelemetryError::SendError {
                sink: "influx",
                message: e.to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "influx"
    }
}
