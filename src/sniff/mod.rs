//! SNI sniffing for raw TLS connections.
//!
//! The raw TLS listener has no CONNECT request to tell it where the client
//! is going. It reads the ClientHello, pulls out the `server_name`
//! extension, and replays the bytes it consumed to whatever handles the
//! connection next.

mod client_hello;
mod error;
mod sniffer;
mod stream;

pub use client_hello::server_name;
pub use error::SniffError;
pub use sniffer::{
    CONTENT_TYPE_HANDSHAKE, MAX_HANDSHAKE_LEN, MAX_RECORD_LEN, RECORD_HEADER_LEN, sniff,
    sniff_with_timeout,
};
pub use stream::ReplayStream;

#[cfg(test)]
pub(crate) use client_hello::testing;
