//! Connection admission and forwarding.
//!
//! This module provides the proxy proper:
//! - the Connect Decision Engine (tunnel / intercept / reject)
//! - the plaintext request filter for HTTP and intercepted HTTPS requests
//! - the raw-stream adapter that lets SNI-sniffed connections reuse the
//!   CONNECT pipeline
//! - TLS interception with per-host certificates signed by a local CA
//! - the HTTP and TLS listeners
//!
//! # Architecture
//!
//! ```text
//!   HTTP listener ──► hyper ──┬─ CONNECT ─────────────────┐
//!                             └─ GET/POST/... ──► filter  │
//!                                                         ▼
//!   TLS listener ──► sniff SNI ──► adapter ──► DecisionEngine ──┬─► tunnel
//!                                                               ├─► intercept ──► filter
//!                                                               └─► close
//! ```
//!
//! Both paths consult the shared [`WhitelistStore`](crate::whitelist::WhitelistStore).

pub mod adapter;
pub mod body;
pub mod ca;
pub mod connect;
pub mod decision;
pub mod error;
pub mod filter;
pub mod http;
pub mod server;
pub mod tls;

pub use adapter::{CONNECTION_ESTABLISHED, ConnectRequest, HTTP10_OK, RawStreamAdapter};
pub use ca::CertificateAuthority;
pub use decision::{ConnectionState, Decision, DecisionEngine, NonSniPolicy, WILDCARD_TARGET};
pub use error::{CaError, ProxyError, ProxyResult};
pub use filter::{DENIAL_BODY, FilterOutcome, RequestContext, RequestFilter};
pub use http::NO_HOST_BODY;
pub use server::{ProxyServer, ProxySettings, ProxyState};
pub use tls::{CertificateCache, create_tls_acceptor, create_tls_connector};
