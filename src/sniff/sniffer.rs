//! Reads a ClientHello off a fresh connection without losing any bytes.
//!
//! The sniffer consumes whole TLS records until the first handshake message
//! is complete, then hands back the host name together with a
//! [`ReplayStream`] that yields every consumed byte again.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use super::client_hello::{HANDSHAKE_CLIENT_HELLO, server_name};
use super::error::SniffError;
use super::stream::ReplayStream;

/// TLS record content type for handshake messages.
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// TLS record header length.
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest record payload accepted (2^14 plus expansion allowance).
pub const MAX_RECORD_LEN: usize = 16384 + 2048;

/// Largest ClientHello we will buffer across records.
pub const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

const HANDSHAKE_HEADER_LEN: usize = 4;

/// Sniff the SNI host from `stream`.
///
/// Returns the host (empty when the peer is not speaking TLS or sent no
/// SNI) and a stream that replays everything read so far.
pub async fn sniff<S>(mut stream: S) -> Result<(String, ReplayStream<S>), SniffError>
where
    S: AsyncRead + Unpin,
{
    let mut consumed = BytesMut::with_capacity(1024);
    let mut handshake: Vec<u8> = Vec::new();
    let mut first_record = true;
    // Start of the next unparsed record; reads may run past it.
    let mut record_offset = 0;

    loop {
        let header_start = record_offset;
        if !fill(&mut stream, &mut consumed, header_start + RECORD_HEADER_LEN).await? {
            if first_record {
                trace!("Peer closed before a full record header, treating as non-TLS");
                return Ok((String::new(), ReplayStream::new(consumed.freeze(), stream)));
            }
            return Err(SniffError::Malformed("truncated record header".to_string()));
        }

        let header = &consumed[header_start..header_start + RECORD_HEADER_LEN];
        let content_type = header[0];
        let major = header[1];
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;

        if content_type != CONTENT_TYPE_HANDSHAKE || major != 3 {
            if first_record {
                debug!(
                    "First record is not a TLS handshake (type 0x{:02x}, major {})",
                    content_type, major
                );
                return Ok((String::new(), ReplayStream::new(consumed.freeze(), stream)));
            }
            return Err(SniffError::Malformed(format!(
                "unexpected record type 0x{:02x} inside ClientHello",
                content_type
            )));
        }
        if len == 0 {
            return Err(SniffError::Malformed("empty handshake record".to_string()));
        }
        if len > MAX_RECORD_LEN {
            return Err(SniffError::TooLarge {
                what: "record",
                len,
                limit: MAX_RECORD_LEN,
            });
        }
        first_record = false;

        let payload_start = header_start + RECORD_HEADER_LEN;
        if !fill(&mut stream, &mut consumed, payload_start + len).await? {
            return Err(SniffError::Malformed("truncated record".to_string()));
        }
        handshake.extend_from_slice(&consumed[payload_start..payload_start + len]);
        record_offset = payload_start + len;

        if handshake.len() < HANDSHAKE_HEADER_LEN {
            continue;
        }
        if handshake[0] != HANDSHAKE_CLIENT_HELLO {
            debug!("First handshake message is type {}, not ClientHello", handshake[0]);
            return Ok((String::new(), ReplayStream::new(consumed.freeze(), stream)));
        }
        let body_len = u32::from_be_bytes([0, handshake[1], handshake[2], handshake[3]]) as usize;
        let message_len = HANDSHAKE_HEADER_LEN + body_len;
        if message_len > MAX_HANDSHAKE_LEN {
            return Err(SniffError::TooLarge {
                what: "handshake",
                len: message_len,
                limit: MAX_HANDSHAKE_LEN,
            });
        }
        if handshake.len() < message_len {
            trace!(
                "ClientHello spans records: have {} of {} bytes",
                handshake.len(),
                message_len
            );
            continue;
        }

        let host = server_name(&handshake[..message_len])?.unwrap_or_default();
        return Ok((host, ReplayStream::new(consumed.freeze(), stream)));
    }
}

/// [`sniff`] bounded by `timeout`.
pub async fn sniff_with_timeout<S>(
    stream: S,
    timeout: Duration,
) -> Result<(String, ReplayStream<S>), SniffError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, sniff(stream))
        .await
        .map_err(|_| SniffError::Timeout)?
}

/// Read until `buf` holds at least `want` bytes. Returns false on EOF.
async fn fill<S>(stream: &mut S, buf: &mut BytesMut, want: usize) -> Result<bool, SniffError>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < want {
        buf.reserve(want - buf.len());
        if stream.read_buf(buf).await? == 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::client_hello::testing::{client_hello_message, client_hello_record};
    use tokio::io::AsyncWriteExt;

    async fn sniff_bytes(data: Vec<u8>) -> Result<(String, Vec<u8>), SniffError> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(&data).await.unwrap();
        client.write_all(b"TRAILER").await.unwrap();
        drop(client);

        let (host, mut replay) = sniff(server).await?;
        let mut replayed = Vec::new();
        replay.read_to_end(&mut replayed).await.unwrap();
        Ok((host, replayed))
    }

    #[tokio::test]
    async fn test_sniff_extracts_host_and_replays() {
        let record = client_hello_record("example.com");
        let (host, replayed) = sniff_bytes(record.clone()).await.unwrap();

        assert_eq!(host, "example.com");
        let mut expected = record;
        expected.extend_from_slice(b"TRAILER");
        assert_eq!(replayed, expected);
    }

    #[tokio::test]
    async fn test_sniff_no_sni_is_empty() {
        let (host, replayed) = sniff_bytes(client_hello_record("")).await.unwrap();
        assert!(host.is_empty());
        assert!(replayed.ends_with(b"TRAILER"));
    }

    #[tokio::test]
    async fn test_sniff_plain_http_is_empty_and_replayed() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
        let (host, replayed) = sniff_bytes(request.clone()).await.unwrap();

        assert!(host.is_empty());
        assert!(replayed.starts_with(&request));
    }

    #[tokio::test]
    async fn test_sniff_short_stream_is_empty() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"\x16\x03").await.unwrap();
        drop(client);

        let (host, replay) = sniff(server).await.unwrap();
        assert!(host.is_empty());
        assert_eq!(replay.pending(), b"\x16\x03");
    }

    #[tokio::test]
    async fn test_sniff_fragmented_client_hello() {
        let message = client_hello_message("split.example.com");
        let (a, b) = message.split_at(20);
        let mut data = Vec::new();
        for part in [a, b] {
            data.extend_from_slice(&[0x16, 0x03, 0x01]);
            data.extend_from_slice(&(part.len() as u16).to_be_bytes());
            data.extend_from_slice(part);
        }

        let (host, replayed) = sniff_bytes(data.clone()).await.unwrap();
        assert_eq!(host, "split.example.com");
        assert!(replayed.starts_with(&data));
    }

    #[tokio::test]
    async fn test_sniff_client_hello_over_three_records_in_one_read() {
        let message = client_hello_message("three.example.com");
        let mut data = Vec::new();
        for part in message.chunks(message.len() / 3 + 1) {
            data.extend_from_slice(&[0x16, 0x03, 0x01]);
            data.extend_from_slice(&(part.len() as u16).to_be_bytes());
            data.extend_from_slice(part);
        }
        data.extend_from_slice(b"APPDATA");

        // One write, so the first read already holds every record.
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(&data).await.unwrap();

        let (host, replay) = sniff(server).await.unwrap();
        assert_eq!(host, "three.example.com");
        assert!(data.starts_with(replay.pending()));
    }

    #[tokio::test]
    async fn test_sniff_non_client_hello_handshake_is_empty() {
        // ServerHello-typed handshake message.
        let mut message = client_hello_message("example.com");
        message[0] = 0x02;
        let mut data = vec![0x16, 0x03, 0x03];
        data.extend_from_slice(&(message.len() as u16).to_be_bytes());
        data.extend_from_slice(&message);

        let (host, _) = sniff_bytes(data).await.unwrap();
        assert!(host.is_empty());
    }

    #[tokio::test]
    async fn test_sniff_truncated_record_is_error() {
        let mut record = client_hello_record("example.com");
        record.truncate(20);

        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&record).await.unwrap();
        drop(client);

        assert!(matches!(sniff(server).await, Err(SniffError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_sniff_oversized_record_is_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&[0x16, 0x03, 0x01, 0xff, 0xff]).await.unwrap();

        assert!(matches!(
            sniff(server).await,
            Err(SniffError::TooLarge { what: "record", .. })
        ));
    }

    #[tokio::test]
    async fn test_sniff_timeout() {
        let (_client, server) = tokio::io::duplex(1024);
        let result = sniff_with_timeout(server, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(SniffError::Timeout)));
    }
}
