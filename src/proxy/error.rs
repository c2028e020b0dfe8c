//! Errors raised while admitting or serving a proxied connection.
//!
//! Most of them end a single connection and are logged by the listener;
//! [`ProxyError::is_disconnect`] and [`ProxyError::is_rejection`] pick out
//! the routine ones so they stay at `debug`.

use std::path::PathBuf;
use thiserror::Error;

use crate::sniff::SniffError;

/// Error ending one proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// hyper failed to serve or send a request.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A CONNECT request without a usable `host:port`.
    #[error("Malformed CONNECT: {0}")]
    InvalidConnect(String),

    /// Handshake, server name or root store trouble.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate authority failure.
    #[error("Certificate authority error: {0}")]
    Ca(#[from] CaError),

    /// SNI sniffing failed.
    #[error("SNI sniffing failed: {0}")]
    Sniff(#[from] SniffError),

    /// The destination refused or could not be reached.
    #[error("Cannot reach {addr}: {message}")]
    UpstreamConnect {
        /// `host:port` that was dialled.
        addr: String,
        /// Why the dial failed.
        message: String,
    },

    /// The CONNECT target is not whitelisted; the connection is dropped
    /// without a response.
    #[error("CONNECT to {target} rejected")]
    ConnectRejected {
        /// The rejected `host:port`.
        target: String,
    },

    /// A response-line API was called on the raw-stream adapter.
    #[error("Raw-stream adapter misuse: {0} is not available on a raw connection")]
    AdapterMisuse(&'static str),

    /// Illegal connection state transition.
    #[error("Invalid connection state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// Failed to bind a listener.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Listen address.
        addr: std::net::SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from loading or using the interception CA.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to read a certificate or key file.
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        /// File that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The CA certificate or key could not be parsed.
    #[error("Failed to parse CA material: {0}")]
    Parse(String),

    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate generation failed.
    #[error("Certificate generation failed: {0}")]
    CertGeneration(String),

    /// Signing a leaf certificate failed.
    #[error("Certificate signing failed: {0}")]
    Signing(String),

    /// The requested name cannot appear in a certificate.
    #[error("Invalid certificate name '{0}'")]
    InvalidName(String),
}

/// Result alias for the proxy.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl ProxyError {
    /// Whether this error is an ordinary peer disconnect.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            ProxyError::Http(e) => e.is_incomplete_message() || e.is_canceled(),
            _ => false,
        }
    }

    /// Whether this error is a refused CONNECT, possibly wrapped by hyper
    /// as a service error.
    pub fn is_rejection(&self) -> bool {
        match self {
            ProxyError::ConnectRejected { .. } => true,
            ProxyError::Http(e) => std::error::Error::source(e)
                .and_then(|source| source.downcast_ref::<ProxyError>())
                .is_some_and(ProxyError::is_rejection),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_routine() {
        let err = ProxyError::ConnectRejected {
            target: "evil.com:443".to_string(),
        };
        assert_eq!(err.to_string(), "CONNECT to evil.com:443 rejected");
        assert!(err.is_rejection());
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_peer_reset_is_a_disconnect() {
        let err: ProxyError = std::io::Error::from(std::io::ErrorKind::ConnectionReset).into();
        assert!(err.is_disconnect());
        assert!(!err.is_rejection());

        let err: ProxyError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_messages_name_the_destination() {
        let err = ProxyError::UpstreamConnect {
            addr: "mirror.internal:443".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot reach mirror.internal:443: connection refused"
        );
        assert!(
            ProxyError::AdapterMisuse("write_header")
                .to_string()
                .contains("write_header")
        );
    }

    #[test]
    fn test_ca_errors_convert() {
        let err: ProxyError = CaError::InvalidName(String::new()).into();
        assert!(matches!(err, ProxyError::Ca(CaError::InvalidName(_))));
        assert!(!err.is_disconnect());
        assert!(!err.is_rejection());
    }
}
