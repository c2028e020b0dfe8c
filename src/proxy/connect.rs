//! CONNECT handling for both listeners.
//!
//! The HTTP listener receives real `CONNECT host:port` requests; the TLS
//! listener synthesizes one per connection from the sniffed SNI name and
//! answers it through a [`RawStreamAdapter`]. Both go through the same
//! [`DecisionEngine`](super::decision::DecisionEngine) and the same
//! [`establish`] step:
//!
//! 1. `Reject`: the connection is closed without a response
//! 2. `Tunnel`: bytes are relayed to `host:443` untouched
//! 3. `Intercept`: TLS is terminated with a certificate signed by our CA and
//!    every decrypted request is filtered before being forwarded

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::adapter::{CONNECTION_ESTABLISHED, ConnectRequest, RawStreamAdapter};
use super::body::{ProxyBody, empty_body};
use super::decision::{ConnectionState, Decision, split_host_port};
use super::error::{ProxyError, ProxyResult};
use super::http::handle_intercepted;
use super::server::ProxyState;
use super::tls::create_tls_acceptor;

/// Host part of a wildcard target.
const WILDCARD_HOST: &str = "*";

/// Handle a CONNECT request from the HTTP listener.
///
/// A rejected target yields `Err(ProxyError::ConnectRejected)`, which makes
/// hyper drop the connection without writing a response.
pub async fn handle_connect(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<Response<ProxyBody>> {
    let mut conn = ConnectionState::Accepted;
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::InvalidConnect("Missing authority in CONNECT request".into()))?
        .to_string();
    conn.advance(ConnectionState::HostResolved)?;

    let decision = state.engine.decide(&authority, &remote_addr.to_string());
    conn.advance(ConnectionState::Decided)?;
    conn.advance(ConnectionState::after(&decision))?;

    if let Decision::Reject { target } = decision {
        return Err(ProxyError::ConnectRejected { target });
    }

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let target = decision.target().to_string();
                if let Err(e) = establish(TokioIo::new(upgraded), decision, remote_addr, state).await {
                    debug!("Tunnel ended for {}: {}", target, e);
                }
            }
            Err(e) => {
                warn!("HTTP upgrade failed for {}: {}", authority, e);
            }
        }
        if let Err(e) = conn.advance(ConnectionState::Closed) {
            debug!("{}", e);
        }
    });

    Ok(Response::new(empty_body()))
}

/// Answer a synthesized CONNECT on a bare connection.
///
/// `conn` must be in [`ConnectionState::HostResolved`]; it ends in
/// [`ConnectionState::Closed`] on every successful return.
pub async fn serve_raw_connect<S>(
    request: ConnectRequest,
    mut adapter: RawStreamAdapter<S>,
    conn: &mut ConnectionState,
    state: Arc<ProxyState>,
) -> ProxyResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    trace!(
        "Synthesized {} {} for {}",
        request.method(),
        request.authority(),
        request.remote_addr()
    );
    let decision = state
        .engine
        .decide(request.host(), &request.remote_addr().to_string());
    conn.advance(ConnectionState::Decided)?;
    conn.advance(ConnectionState::after(&decision))?;

    if decision.is_reject() {
        debug!("Closing raw connection for {}", request.authority());
        conn.advance(ConnectionState::Closed)?;
        return Ok(());
    }

    // Swallowed by the adapter; nothing reaches the client.
    adapter.write_all(CONNECTION_ESTABLISHED).await?;
    let stream = adapter.hijack();

    let result = establish(stream, decision, request.remote_addr(), state).await;
    conn.advance(ConnectionState::Closed)?;
    result
}

/// Carry out a tunnel or intercept decision on an accepted client stream.
pub async fn establish<S>(
    client: S,
    decision: Decision,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match decision {
        Decision::Tunnel { target } => tunnel(client, &target).await,
        Decision::Intercept { target } => intercept(client, &target, remote_addr, state).await,
        Decision::Reject { target } => Err(ProxyError::ConnectRejected { target }),
    }
}

/// Relay bytes between `client` and `target` until either side closes.
pub async fn tunnel<S>(mut client: S, target: &str) -> ProxyResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut upstream = TcpStream::connect(target)
        .await
        .map_err(|e| ProxyError::UpstreamConnect {
            addr: target.to_string(),
            message: e.to_string(),
        })?;
    debug!("Tunnel open to {}", target);

    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    debug!(
        "Tunnel to {} closed ({} bytes up, {} bytes down)",
        target, sent, received
    );
    Ok(())
}

/// Terminate TLS locally and serve the decrypted requests.
async fn intercept<S>(
    client: S,
    target: &str,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (hostaddr, _) = split_host_port(target);
    let acceptor = create_tls_acceptor(state.cert_cache.clone(), Some(hostaddr.to_string()));
    let client_tls = acceptor
        .accept(client)
        .await
        .map_err(|e| ProxyError::Tls(format!("Client TLS handshake failed: {}", e)))?;
    debug!("Intercepting TLS session for {} from {}", target, remote_addr);

    let default_host: Option<Arc<str>> = (hostaddr != WILDCARD_HOST).then(|| Arc::from(hostaddr));
    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        let default_host = default_host.clone();
        async move {
            Ok::<_, Infallible>(
                handle_intercepted(req, remote_addr, default_host.as_deref(), &state).await,
            )
        }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(client_tls), service)
        .await
        .map_err(ProxyError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ca::CertificateAuthority;
    use crate::proxy::decision::NonSniPolicy;
    use crate::proxy::server::ProxySettings;
    use crate::telemetry::NoopTracker;
    use crate::whitelist::{CacheKey, MemoryLoader, WhitelistStore};
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::net::TcpListener;

    fn state(policy: NonSniPolicy) -> Arc<ProxyState> {
        let whitelist = Arc::new(
            WhitelistStore::open(
                Box::new(MemoryLoader::new([r"https://example\.com"])),
                Arc::new(NoopTracker),
                CacheKey::Full,
            )
            .unwrap(),
        );
        let settings = ProxySettings {
            non_sni_policy: policy,
            ..ProxySettings::default()
        };
        Arc::new(ProxyState::new(
            settings,
            whitelist,
            Arc::new(CertificateAuthority::generate().unwrap()),
            Arc::new(NoopTracker),
        ))
    }

    fn caller() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_tunnel_relays_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let (near, mut far) = duplex(64);
        let relay = tokio::spawn(async move { tunnel(near, &target).await });

        far.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        far.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");

        drop(far);
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_to_dead_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (near, _far) = duplex(64);
        assert!(matches!(
            tunnel(near, &target).await,
            Err(ProxyError::UpstreamConnect { .. })
        ));
    }

    #[tokio::test]
    async fn test_raw_reject_closes_silently() {
        let state = state(NonSniPolicy::Reject);
        let (near, mut far) = duplex(256);
        let mut conn = ConnectionState::HostResolved;

        serve_raw_connect(
            ConnectRequest::synthesize("evil.com", caller()),
            RawStreamAdapter::new(near),
            &mut conn,
            state,
        )
        .await
        .unwrap();
        assert_eq!(conn, ConnectionState::Closed);

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_raw_non_sni_reject() {
        let state = state(NonSniPolicy::Reject);
        let (near, mut far) = duplex(256);
        let mut conn = ConnectionState::HostResolved;

        serve_raw_connect(
            ConnectRequest::synthesize("", caller()),
            RawStreamAdapter::new(near),
            &mut conn,
            state,
        )
        .await
        .unwrap();

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_establish_refuses_reject() {
        let (near, _far) = duplex(64);
        let result = establish(
            near,
            Decision::Reject {
                target: "evil.com:443".to_string(),
            },
            caller(),
            state(NonSniPolicy::Reject),
        )
        .await;
        assert!(matches!(result, Err(ProxyError::ConnectRejected { .. })));
    }
}
