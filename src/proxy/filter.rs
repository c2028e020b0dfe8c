//! Plaintext request filter.
//!
//! Applies the whitelist to individual HTTP requests: ordinary proxy
//! requests on the HTTP listener and every request inside an intercepted
//! TLS session. A keep-alive connection is re-checked per request.
//!
//! The filter never fails: bad input becomes `400`, a denial `403`, and a
//! panic while evaluating `500`.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, HOST, HeaderValue};
use hyper::{Request, Response, StatusCode};
use tracing::{error, info, warn};

use super::body::{ProxyBody, full_body, text_response};
use super::decision::{TLS_PORT, split_host_port};
use super::server::ProxySettings;
use crate::whitelist::WhitelistStore;

/// Body of every whitelist denial.
pub const DENIAL_BODY: &str = "<html><body>Requested destination not in whitelist</body></html>";

/// Per-connection facts the filter needs besides the request itself.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Peer address as `ip:port`, if known.
    pub remote_addr: Option<String>,
    /// Whether the request arrived inside an HTTPS tunnel.
    pub via_tls: bool,
}

impl RequestContext {
    /// Context for a request on the plain HTTP listener.
    pub fn plain(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr.to_string()),
            via_tls: false,
        }
    }

    /// Context for a request inside an intercepted TLS session.
    pub fn tunneled(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr.to_string()),
            via_tls: true,
        }
    }
}

/// Result of filtering one request.
#[derive(Debug)]
pub enum FilterOutcome {
    /// Forward the request.
    Allow,
    /// Answer with this response instead.
    Deny(Response<ProxyBody>),
}

impl FilterOutcome {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, FilterOutcome::Allow)
    }
}

/// Whitelist check for individual HTTP requests.
pub struct RequestFilter {
    whitelist: Arc<WhitelistStore>,
    verbose: bool,
}

impl RequestFilter {
    /// Create a filter backed by `whitelist`.
    pub fn new(whitelist: Arc<WhitelistStore>, settings: &ProxySettings) -> Self {
        Self {
            whitelist,
            verbose: settings.verbose,
        }
    }

    /// Decide whether `req` may be forwarded.
    pub fn filter<B>(&self, req: &Request<B>, ctx: &RequestContext) -> FilterOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.evaluate(req, ctx))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!("Request filter failed: {}", panic_message(panic.as_ref()));
                FilterOutcome::Deny(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal proxy error",
                ))
            }
        }
    }

    fn evaluate<B>(&self, req: &Request<B>, ctx: &RequestContext) -> FilterOutcome {
        let Some(remote) = ctx.remote_addr.as_deref() else {
            warn!("Request without remote address");
            return bad_request("Missing remote address");
        };
        let Ok(remote) = remote.parse::<SocketAddr>() else {
            warn!("userip: {:?} is not IP:port", remote);
            return bad_request("Malformed remote address");
        };
        let ip = remote.ip();

        // Origin-form requests (typical inside an intercepted session) name
        // their destination only in the Host header.
        let (candidate, from_host_header) = match req.uri().authority() {
            Some(authority) => (authority.as_str(), false),
            None => match req.headers().get(HOST).and_then(|h| h.to_str().ok()) {
                Some(host) if !host.is_empty() => (host, true),
                _ => {
                    warn!("Request from {} names no destination host", ip);
                    return bad_request("Missing destination host");
                }
            },
        };
        // Drop any userinfo.
        let candidate = candidate.rsplit('@').next().unwrap_or(candidate);

        if from_host_header && self.whitelist.check_tls_host(candidate) {
            return self.allow(ip, candidate, req);
        }

        let (hostaddr, port) = split_host_port(candidate);
        let probe = hostaddr.trim_start_matches('[').trim_end_matches(']');
        let tls_port = port == Some(TLS_PORT) || (port.is_none() && ctx.via_tls);
        let already_checked = from_host_header && probe == candidate;
        if tls_port && !already_checked && self.whitelist.check_tls_host(probe) {
            return self.allow(ip, probe, req);
        }

        if self.whitelist.check_http_host(probe) {
            return self.allow(ip, probe, req);
        }

        info!("IP {} was blocked visiting - {}", ip, probe);
        warn!(
            target: "sni_warden::audit",
            caller = %remote,
            host = probe,
            path = req.uri().path(),
            decision = "deny",
            "request denied"
        );
        FilterOutcome::Deny(denial_response())
    }

    fn allow<B>(&self, ip: std::net::IpAddr, host: &str, req: &Request<B>) -> FilterOutcome {
        if self.verbose {
            info!("IP {} visited - {}", ip, host);
        }
        info!(
            target: "sni_warden::audit",
            caller = %ip,
            host,
            path = req.uri().path(),
            decision = "allow",
            "request allowed"
        );
        FilterOutcome::Allow
    }
}

/// The `403` sent for every whitelist denial.
pub fn denial_response() -> Response<ProxyBody> {
    let mut response = Response::new(full_body(DENIAL_BODY));
    *response.status_mut() = StatusCode::FORBIDDEN;
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    response
}

fn bad_request(message: &'static str) -> FilterOutcome {
    FilterOutcome::Deny(text_response(StatusCode::BAD_REQUEST, message))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
