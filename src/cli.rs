//! Command-line interface definitions for sni-warden.
//!
//! Uses clap's derive API for type-safe argument parsing. Every flag is
//! optional; unset flags fall back to the configuration file and then to
//! built-in defaults.

use clap::Parser;
use std::path::PathBuf;

use crate::config::SinkKind;
use crate::proxy::NonSniPolicy;
use crate::whitelist::CacheKey;

/// Allow-list enforcing forward proxy for HTTP and TLS traffic.
///
/// Plain HTTP proxy requests (including CONNECT) are accepted on the HTTP
/// address. Raw TLS connections are accepted on the TLS address, where the
/// destination is read from the ClientHello's SNI. Only destinations
/// matching a whitelist pattern are reached. Send SIGUSR1 to reload the
/// whitelist.
#[derive(Parser, Debug, Default)]
#[command(name = "sni-warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file.
    ///
    /// Merged on top of the system config; CLI flags still take priority.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Proxy and plain HTTP listen address (default `:3128`).
    #[arg(long = "http-addr", value_name = "ADDR")]
    pub http_addr: Option<String>,

    /// Raw TLS listen address (default `:3129`).
    #[arg(long = "tls-addr", value_name = "ADDR")]
    pub tls_addr: Option<String>,

    /// Line separated host regex whitelist (default `whitelist.lsv`).
    #[arg(short = 'w', long = "whitelist", value_name = "PATH")]
    pub whitelist: Option<PathBuf>,

    /// CA certificate for TLS interception (default `ca.crt`).
    #[arg(long = "ca-cert", value_name = "PATH")]
    pub ca_cert: Option<PathBuf>,

    /// CA private key for TLS interception (default `ca.key`).
    #[arg(long = "ca-key", value_name = "PATH")]
    pub ca_key: Option<PathBuf>,

    /// Event sink (repeatable). Replaces the configured sink list.
    #[arg(long = "tracker", value_name = "SINK", value_enum)]
    pub trackers: Vec<SinkKind>,

    /// StatsD address (default `localhost:8125`).
    #[arg(long = "statsd", value_name = "ADDR")]
    pub statsd: Option<String>,

    /// InfluxDB UDP line-protocol address.
    #[arg(long = "influx", value_name = "ADDR")]
    pub influx: Option<String>,

    /// Handling of TLS clients that send no SNI.
    #[arg(long = "non-sni", value_name = "POLICY", value_enum)]
    pub non_sni: Option<NonSniPolicy>,

    /// Whitelist cache keying.
    #[arg(long = "cache-key", value_name = "KEY", value_enum)]
    pub cache_key: Option<CacheKey>,

    /// Increase log verbosity.
    ///
    /// Any level also logs every allowed visit.
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_basic() {
        let cli = Cli::parse_from(["sni-warden"]);
        assert!(cli.config.is_none());
        assert!(cli.http_addr.is_none());
        assert!(cli.trackers.is_empty());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_with_options() {
        let cli = Cli::parse_from([
            "sni-warden",
            "--http-addr",
            ":8080",
            "--tls-addr",
            "127.0.0.1:8443",
            "-w",
            "/etc/sni-warden/whitelist.lsv",
            "--tracker",
            "log",
            "--tracker",
            "influx",
            "--influx",
            "metrics:8089",
            "--non-sni",
            "reject",
            "--cache-key",
            "origin",
            "-vv",
        ]);

        assert_eq!(cli.http_addr.as_deref(), Some(":8080"));
        assert_eq!(cli.tls_addr.as_deref(), Some("127.0.0.1:8443"));
        assert_eq!(
            cli.whitelist,
            Some(PathBuf::from("/etc/sni-warden/whitelist.lsv"))
        );
        assert_eq!(cli.trackers, vec![SinkKind::Log, SinkKind::Influx]);
        assert_eq!(cli.influx.as_deref(), Some("metrics:8089"));
        assert_eq!(cli.non_sni, Some(NonSniPolicy::Reject));
        assert_eq!(cli.cache_key, Some(CacheKey::Origin));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["sni-warden", "--non-sni", "maybe"]).is_err());
    }
}
