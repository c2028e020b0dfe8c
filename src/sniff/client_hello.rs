//! ClientHello parsing.

use tls_parser::{
    SNIType, TlsExtension, TlsMessage, TlsMessageHandshake, parse_tls_extensions,
    parse_tls_message_handshake,
};
use tracing::trace;

use super::error::SniffError;

/// Handshake message type of a ClientHello.
pub const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;

/// Extract the SNI host name from one complete handshake message.
///
/// `message` is the handshake header (type + u24 length) followed by the
/// body. Returns `Ok(None)` when the message is a ClientHello without a
/// host-name SNI entry.
pub fn server_name(message: &[u8]) -> Result<Option<String>, SniffError> {
    let (_, msg) = parse_tls_message_handshake(message)
        .map_err(|e| SniffError::Malformed(format!("handshake: {:?}", e)))?;

    let TlsMessage::Handshake(TlsMessageHandshake::ClientHello(hello)) = msg else {
        trace!("Handshake message is not a ClientHello");
        return Ok(None);
    };

    let Some(ext) = hello.ext else {
        trace!("ClientHello carries no extensions");
        return Ok(None);
    };

    let (_, extensions) = parse_tls_extensions(ext)
        .map_err(|e| SniffError::Malformed(format!("extensions: {:?}", e)))?;

    for extension in extensions {
        let TlsExtension::SNI(names) = extension else {
            continue;
        };
        for (kind, name) in names {
            if kind != SNIType::HostName {
                continue;
            }
            let host = std::str::from_utf8(name)
                .map_err(|_| SniffError::Malformed("SNI host name is not UTF-8".to_string()))?;
            trace!("Found SNI: {}", host);
            return Ok(Some(host.to_string()));
        }
    }
    Ok(None)
}
