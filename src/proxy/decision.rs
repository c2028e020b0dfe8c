//! Connect decision engine.
//!
//! Turns a candidate host (from a CONNECT request or a sniffed SNI name) and
//! the caller's address into one of tunnel, intercept or reject.
//!
//! ```text
//! Accepted ──► HostResolved ──► Decided ──┬─► Tunneled ───┐
//!                                         ├─► Intercepted ┼─► Closed
//!                                         └─► Rejected ───┘
//! ```
//!
//! Every decision is written to the audit log target together with the
//! caller and the target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, trace, warn};

use super::error::ProxyError;
use super::server::ProxySettings;
use crate::whitelist::WhitelistStore;

/// Port every CONNECT/SNI decision targets.
pub const TLS_PORT: u16 = 443;

/// Target used when a client sent no SNI.
pub const WILDCARD_TARGET: &str = "*:443";

/// Outcome of a connection-level decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Relay bytes untouched to `target`.
    Tunnel {
        /// `host:port` to connect to.
        target: String,
    },
    /// Terminate TLS locally and filter each request.
    Intercept {
        /// `host:port` the intercepted session is for.
        target: String,
    },
    /// Close the connection without a response.
    Reject {
        /// `host:port` that was refused.
        target: String,
    },
}

impl Decision {
    /// The resolved `host:port`.
    pub fn target(&self) -> &str {
        match self {
            Decision::Tunnel { target }
            | Decision::Intercept { target }
            | Decision::Reject { target } => target,
        }
    }

    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Tunnel { .. } => "tunnel",
            Decision::Intercept { .. } => "intercept",
            Decision::Reject { .. } => "reject",
        }
    }

    /// Whether the connection is refused.
    pub fn is_reject(&self) -> bool {
        matches!(self, Decision::Reject { .. })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_str(), self.target())
    }
}

/// What to do with a TLS client that sent no SNI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NonSniPolicy {
    /// Close the connection without consulting the whitelist.
    Reject,
    /// Intercept under the wildcard target and filter each request.
    #[default]
    Intercept,
}

/// Lifecycle of one proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, nothing read yet.
    Accepted,
    /// Destination host known (possibly empty).
    HostResolved,
    /// A [`Decision`] has been made.
    Decided,
    /// Bytes relayed to the target.
    Tunneled,
    /// TLS terminated locally.
    Intercepted,
    /// Connection refused.
    Rejected,
    /// Finished.
    Closed,
}

impl ConnectionState {
    /// State name for diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::HostResolved => "host_resolved",
            ConnectionState::Decided => "decided",
            ConnectionState::Tunneled => "tunneled",
            ConnectionState::Intercepted => "intercepted",
            ConnectionState::Rejected => "rejected",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether moving to `next` is legal.
    pub fn can_advance(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepted, HostResolved)
                | (HostResolved, Decided)
                | (Decided, Tunneled | Intercepted | Rejected)
                | (Accepted | HostResolved | Tunneled | Intercepted | Rejected, Closed)
        )
    }

    /// Move to `next`, refusing illegal transitions.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), ProxyError> {
        if !self.can_advance(next) {
            return Err(ProxyError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        trace!("Connection state {} -> {}", self.as_str(), next.as_str());
        *self = next;
        Ok(())
    }

    /// The terminal state a decision leads to.
    pub fn after(decision: &Decision) -> ConnectionState {
        match decision {
            Decision::Tunnel { .. } => ConnectionState::Tunneled,
            Decision::Intercept { .. } => ConnectionState::Intercepted,
            Decision::Reject { .. } => ConnectionState::Rejected,
        }
    }
}

/// Split `host[:port]` into host and port, keeping IPv6 brackets.
///
/// Whatever follows the port colon is dropped from the host; the port is
/// `None` unless that token is numeric.
pub fn split_host_port(authority: &str) -> (&str, Option<u16>) {
    if authority.starts_with('[') {
        if let Some(end) = authority.find(']') {
            let host = &authority[..=end];
            let port = authority[end + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (authority, None);
    }
    match authority.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address.
        Some((host, _)) if host.contains(':') => (authority, None),
        Some((host, port)) => (host, port.parse().ok()),
        None => (authority, None),
    }
}

/// Decides what happens to CONNECT and sniffed-SNI connections.
pub struct DecisionEngine {
    whitelist: Arc<WhitelistStore>,
    non_sni_policy: NonSniPolicy,
    verbose: bool,
}

impl DecisionEngine {
    /// Create an engine backed by `whitelist`.
    pub fn new(whitelist: Arc<WhitelistStore>, settings: &ProxySettings) -> Self {
        Self {
            whitelist,
            non_sni_policy: settings.non_sni_policy,
            verbose: settings.verbose,
        }
    }

    /// The configured handling of SNI-less clients.
    pub fn non_sni_policy(&self) -> NonSniPolicy {
        self.non_sni_policy
    }

    /// Decide the fate of a connection to `host` from `caller` (`ip:port`).
    pub fn decide(&self, host: &str, caller: &str) -> Decision {
        let (hostaddr, _) = split_host_port(host);
        let target = if hostaddr.is_empty() {
            WILDCARD_TARGET.to_string()
        } else {
            format!("{}:{}", hostaddr, TLS_PORT)
        };

        let Ok(caller_addr) = caller.parse::<SocketAddr>() else {
            warn!("Caller address {:?} is not ip:port, rejecting", caller);
            let decision = Decision::Reject { target };
            self.audit(caller, host, &decision);
            return decision;
        };
        let ip = caller_addr.ip();

        let decision = if hostaddr.is_empty() {
            if self.verbose {
                info!("non-SNI request from ip - {}", ip);
            }
            match self.non_sni_policy {
                NonSniPolicy::Reject => Decision::Reject { target },
                NonSniPolicy::Intercept => Decision::Intercept { target },
            }
        } else {
            if self.verbose {
                info!("CONNECT from ip - {} - for host {}", ip, hostaddr);
            }
            let probe = hostaddr.trim_start_matches('[').trim_end_matches(']');
            if self.whitelist.check_tls_host(probe) {
                Decision::Tunnel { target }
            } else {
                Decision::Reject { target }
            }
        };

        self.audit(caller, host, &decision);
        decision
    }

    fn audit(&self, caller: &str, host: &str, decision: &Decision) {
        if decision.is_reject() {
            warn!(
                target: "sni_warden::audit",
                caller,
                host,
                destination = decision.target(),
                decision = decision.as_str(),
                "connection rejected"
            );
        } else {
            info!(
                target: "sni_warden::audit",
                caller,
                host,
                destination = decision.target(),
                decision = decision.as_str(),
                "connection admitted"
            );
        }
    }
}
