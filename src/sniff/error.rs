//! SNI sniffing error types.

use thiserror::Error;

/// Errors that end a connection during SNI sniffing.
///
/// A connection that is simply not TLS, or a ClientHello without SNI, is not
/// an error: the sniffer reports an empty host for those.
#[derive(Debug, Error)]
pub enum SniffError {
    /// Socket read failed.
    #[error("I/O error while sniffing: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a TLS handshake that could not be parsed.
    #[error("Malformed TLS handshake: {0}")]
    Malformed(String),

    /// A record or handshake message exceeded the size we are willing to buffer.
    #[error("TLS {what} of {len} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Which unit overflowed ("record" or "handshake").
        what: &'static str,
        /// Declared length.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The peer did not finish its ClientHello in time.
    #[error("Timed out waiting for ClientHello")]
    Timeout,
}
