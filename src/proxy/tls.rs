//! TLS configuration for intercepted sessions.
//!
//! The client side of an intercepted session is served with a leaf
//! certificate issued on demand by the [`CertificateAuthority`] and cached
//! per host. The name comes from the client's SNI; clients that sent none
//! get the decided target host, or `*` for the non-SNI fallback.
//!
//! Both sides speak HTTP/1.1 only: decrypted requests are served by an
//! HTTP/1.1 server so each one can be filtered.

use super::ca::CertificateAuthority;
use super::error::ProxyError;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::ServerName;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, trace};

const HTTP11: &[u8] = b"http/1.1";

/// Leaf certificates keyed by lowercase host name.
pub struct CertificateCache {
    ca: Arc<CertificateAuthority>,
    leaves: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl CertificateCache {
    /// Create an empty cache issuing from `ca`.
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        Self {
            ca,
            leaves: RwLock::new(HashMap::new()),
        }
    }

    /// The certified key for `host`, issuing one on first use.
    pub fn get_or_generate(&self, host: &str) -> Result<Arc<CertifiedKey>, ProxyError> {
        let host = host.to_ascii_lowercase();
        if let Some(key) = self
            .leaves
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&host)
        {
            trace!("Leaf certificate cache hit for {}", host);
            return Ok(key.clone());
        }

        let leaf = self.ca.generate_cert(&host)?;
        let signer = rustls::crypto::aws_lc_rs::sign::any_supported_type(&leaf.key_der)?;
        let chain = vec![leaf.cert_der, self.ca.cert_der().clone()];
        let key = Arc::new(CertifiedKey::new(chain, signer));

        // Concurrent handshakes for one host keep the first key issued.
        let mut leaves = self.leaves.write().unwrap_or_else(PoisonError::into_inner);
        Ok(leaves.entry(host).or_insert(key).clone())
    }

    /// Number of cached leaves.
    pub fn len(&self) -> usize {
        self.leaves
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no leaf has been issued yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TargetResolver {
    cache: Arc<CertificateCache>,
    fallback: Option<String>,
}

impl ResolvesServerCert for TargetResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name().or(self.fallback.as_deref())?;
        match self.cache.get_or_generate(name) {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Cannot present a certificate for {}: {}", name, e);
                None
            }
        }
    }
}

impl fmt::Debug for TargetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetResolver")
            .field("fallback", &self.fallback)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Acceptor for the client side of an intercepted session.
///
/// `fallback` names the certificate for clients that send no SNI.
pub fn create_tls_acceptor(cache: Arc<CertificateCache>, fallback: Option<String>) -> TlsAcceptor {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(TargetResolver { cache, fallback }));
    config.alpn_protocols = vec![HTTP11.to_vec()];
    TlsAcceptor::from(Arc::new(config))
}

/// Connector for the upstream side, verifying against the system roots.
pub fn create_tls_connector() -> Result<TlsConnector, ProxyError> {
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        debug!("Skipping unreadable native root: {}", e);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if roots.is_empty() {
        return Err(ProxyError::Tls("No usable system root certificates".into()));
    }
    debug!("Trusting {} system roots ({} ignored)", added, ignored);

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![HTTP11.to_vec()];
    Ok(TlsConnector::from(Arc::new(config)))
}

/// The TLS server name for `host` (a DNS name or a possibly bracketed IP).
pub fn server_name(host: &str) -> Result<ServerName<'static>, ProxyError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {}", host)))
}
