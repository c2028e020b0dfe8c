//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while delivering tracker events.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to connect to syslog.
    #[error("Failed to connect to syslog: {0}")]
    SyslogConnection(String),

    /// Failed to send an event to its sink.
    #[error("Failed to send event to {sink}: {message}")]
    SendError {
        /// Sink that failed.
        sink: &'static str,
        /// Underlying failure.
        message: String,
    },

    /// Failed to set up a UDP metrics socket.
    #[error("Failed to open metrics socket for {addr}: {source}")]
    Socket {
        /// Configured sink address.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Encoded event exceeds the sink's datagram budget.
    #[error("Encoded event is {size} bytes, exceeding payload limit of {limit}")]
    PayloadTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Failed to serialize event to JSON.
    #[error("Failed to serialize event: {0}")]
    SerializationError(#[from] serde_json::Error),
}
