//! Proxy listeners.
//!
//! Two TCP listeners share one [`ProxyState`]:
//! - the HTTP listener serves proxy requests with hyper's HTTP/1.1 server
//!   (with upgrade support for CONNECT)
//! - the TLS listener sniffs the SNI name off each raw connection and feeds
//!   a synthesized CONNECT into the same decision pipeline
//!
//! Each connection is handled in a separate Tokio task. An accept error is
//! logged and the loop keeps going; only the shutdown signal ends it.
//!
//! # Example
//!
//! ```ignore
//! use sni_warden::proxy::{ProxyServer, ProxySettings, ProxyState};
//! use std::sync::Arc;
//!
//! let state = Arc::new(ProxyState::new(ProxySettings::default(), whitelist, ca, tracker));
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let server = ProxyServer::bind(state, shutdown_rx).await?;
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::adapter::{ConnectRequest, RawStreamAdapter};
use super::body::ProxyBody;
use super::ca::CertificateAuthority;
use super::connect::{handle_connect, serve_raw_connect};
use super::decision::{ConnectionState, DecisionEngine, NonSniPolicy};
use super::error::{ProxyError, ProxyResult};
use super::filter::RequestFilter;
use super::http::{handle_http, serve_event};
use super::tls::{CertificateCache, create_tls_connector};
use crate::sniff::sniff_with_timeout;
use crate::telemetry::{ServeTimer, Tracker};
use crate::whitelist::{CacheKey, WhitelistStore};

/// Default plain HTTP proxy port.
pub const DEFAULT_HTTP_PORT: u16 = 3128;

/// Default raw TLS port.
pub const DEFAULT_TLS_PORT: u16 = 3129;

/// Default time allowed for a client to send its ClientHello.
pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Runtime settings shared by the decision engine, filter and listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Plain HTTP proxy listen address.
    pub http_addr: SocketAddr,
    /// Raw TLS listen address.
    pub tls_addr: SocketAddr,
    /// Handling of TLS clients without SNI.
    pub non_sni_policy: NonSniPolicy,
    /// Whitelist cache keying.
    pub cache_key: CacheKey,
    /// Time allowed for the ClientHello.
    pub sniff_timeout: Duration,
    /// Log every allowed visit.
    pub verbose: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT)),
            tls_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TLS_PORT)),
            non_sni_policy: NonSniPolicy::default(),
            cache_key: CacheKey::default(),
            sniff_timeout: DEFAULT_SNIFF_TIMEOUT,
            verbose: false,
        }
    }
}

/// Everything a connection handler needs.
pub struct ProxyState {
    pub(crate) settings: ProxySettings,
    pub(crate) whitelist: Arc<WhitelistStore>,
    pub(crate) engine: DecisionEngine,
    pub(crate) filter: RequestFilter,
    pub(crate) cert_cache: Arc<CertificateCache>,
    pub(crate) tracker: Arc<dyn Tracker>,
    pub(crate) tls_connector: Option<TlsConnector>,
    pub(crate) http_client: Client<HttpConnector, Incoming>,
}

impl ProxyState {
    /// Assemble the shared state.
    ///
    /// Upstream TLS uses the system roots; if none can be loaded the proxy
    /// still runs, but intercepted requests fail with `502`.
    pub fn new(
        settings: ProxySettings,
        whitelist: Arc<WhitelistStore>,
        ca: Arc<CertificateAuthority>,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        let tls_connector = match create_tls_connector() {
            Ok(connector) => Some(connector),
            Err(e) => {
                warn!("Upstream TLS unavailable, intercepted requests will fail: {}", e);
                None
            }
        };

        Self {
            engine: DecisionEngine::new(whitelist.clone(), &settings),
            filter: RequestFilter::new(whitelist.clone(), &settings),
            cert_cache: Arc::new(CertificateCache::new(ca)),
            http_client: Client::builder(TokioExecutor::new()).build_http(),
            settings,
            whitelist,
            tracker,
            tls_connector,
        }
    }

    /// Verify intercepted upstreams with `connector` instead of the system
    /// roots.
    pub fn with_upstream_connector(mut self, connector: TlsConnector) -> Self {
        self.tls_connector = Some(connector);
        self
    }

    /// The settings this state was built with.
    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// The shared whitelist.
    pub fn whitelist(&self) -> &Arc<WhitelistStore> {
        &self.whitelist
    }

    /// The interception certificate cache.
    pub fn cert_cache(&self) -> &Arc<CertificateCache> {
        &self.cert_cache
    }
}

/// The two bound listeners and their shared state.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    http_listener: TcpListener,
    tls_listener: TcpListener,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Bind both listeners from `state.settings()`.
    pub async fn bind(
        state: Arc<ProxyState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ProxyResult<Self> {
        let http_listener = bind(state.settings.http_addr).await?;
        let tls_listener = bind(state.settings.tls_addr).await?;
        Ok(Self {
            state,
            http_listener,
            tls_listener,
            shutdown_rx,
        })
    }

    /// Bound address of the HTTP listener.
    pub fn http_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    /// Bound address of the TLS listener.
    pub fn tls_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.tls_listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal is received.
    pub async fn run(self) -> ProxyResult<()> {
        info!("HTTP proxy listening on {}", self.http_addr()?);
        info!("TLS proxy listening on {}", self.tls_addr()?);

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = self.http_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted HTTP connection from {}", addr);
                        spawn_handler(handle_http_connection(stream, addr, self.state.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to accept HTTP connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                accepted = self.tls_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TLS connection from {}", addr);
                        spawn_handler(handle_tls_connection(stream, addr, self.state.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to accept TLS connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn bind(addr: SocketAddr) -> ProxyResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind { addr, source })
}

fn spawn_handler<F>(handler: F)
where
    F: Future<Output = ProxyResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = handler.await {
            // Resets and rejections are routine.
            if e.is_disconnect() || e.is_rejection() {
                debug!("Connection ended: {}", e);
            } else {
                warn!("Connection error: {}", e);
            }
        }
    });
}

/// Serve one connection on the HTTP listener.
async fn handle_http_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { proxy_request(req, remote_addr, state).await }
    });

    // Upgrades are needed for CONNECT.
    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

async fn proxy_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<Response<ProxyBody>> {
    if req.method() == Method::CONNECT {
        handle_connect(req, remote_addr, state).await
    } else {
        handle_http(req, remote_addr, &state).await
    }
}

/// Serve one connection on the TLS listener.
async fn handle_tls_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<()> {
    let mut conn = ConnectionState::Accepted;
    let (host, replay) = sniff_with_timeout(stream, state.settings.sniff_timeout).await?;
    conn.advance(ConnectionState::HostResolved)?;

    let _timer = ServeTimer::start(state.tracker.clone(), serve_event("https", &host, None));

    if !host.is_empty() && !state.whitelist.check_tls_host(&host) {
        info!("IP {} was blocked visiting - {}", remote_addr.ip(), host);
        conn.advance(ConnectionState::Closed)?;
        return Ok(());
    }

    let request = ConnectRequest::synthesize(host, remote_addr);
    serve_raw_connect(request, RawStreamAdapter::new(replay), &mut conn, state.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingTracker;
    use crate::whitelist::MemoryLoader;

    fn state(tracker: Arc<RecordingTracker>) -> Arc<ProxyState> {
        let whitelist = Arc::new(
            WhitelistStore::open(
                Box::new(MemoryLoader::new([r"https://example\.com"])),
                tracker.clone(),
                CacheKey::Full,
            )
            .unwrap(),
        );
        let settings = ProxySettings {
            http_addr: "127.0.0.1:0".parse().unwrap(),
            tls_addr: "127.0.0.1:0".parse().unwrap(),
            ..ProxySettings::default()
        };
        Arc::new(ProxyState::new(
            settings,
            whitelist,
            Arc::new(CertificateAuthority::generate().unwrap()),
            tracker,
        ))
    }

    #[test]
    fn test_default_settings() {
        let settings = ProxySettings::default();
        assert_eq!(settings.http_addr.port(), 3128);
        assert_eq!(settings.tls_addr.port(), 3129);
        assert_eq!(settings.non_sni_policy, NonSniPolicy::Intercept);
        assert_eq!(settings.cache_key, CacheKey::Full);
        assert!(!settings.verbose);
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let state = state(Arc::new(RecordingTracker::new()));
        assert!(state.cert_cache().is_empty());
        assert_eq!(state.whitelist().size(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = ProxyServer::bind(state, shutdown_rx).await.unwrap();
        assert_ne!(server.http_addr().unwrap().port(), 0);
        assert_ne!(server.tls_addr().unwrap().port(), 0);

        let handle = tokio::spawn(server.run());
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let tracker = Arc::new(RecordingTracker::new());
        let mut settings = state(tracker.clone()).settings().clone();
        settings.http_addr = addr;
        let whitelist = Arc::new(
            WhitelistStore::open(
                Box::new(MemoryLoader::new(Vec::<String>::new())),
                tracker.clone(),
                CacheKey::Full,
            )
            .unwrap(),
        );
        let state = Arc::new(ProxyState::new(
            settings,
            whitelist,
            Arc::new(CertificateAuthority::generate().unwrap()),
            tracker,
        ));

        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            ProxyServer::bind(state, rx).await,
            Err(ProxyError::Bind { .. })
        ));
    }
}
