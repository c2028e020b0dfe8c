//! sni-warden: allow-list enforcing forward proxy.
//!
//! This is the main entry point for the sni-warden binary. It handles CLI
//! argument parsing, configuration loading, tracker and whitelist setup,
//! and runs both listeners until SIGINT or SIGTERM.
//!
//! SIGUSR1 reloads the whitelist file. A failed reload keeps the previous
//! entries.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sni_warden::{
    cli::Cli,
    config::ConfigLoader,
    proxy::{CertificateAuthority, ProxyServer, ProxyState},
    whitelist::{FileLoader, WhitelistStore},
};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    debug!("Loaded configuration: {:?}", config);

    let settings = config
        .proxy_settings()
        .context("Invalid proxy configuration")?;
    let tracker = config
        .tracker_settings()
        .context("Invalid tracker configuration")?
        .build();

    let whitelist_path = config.whitelist_path();
    let whitelist = Arc::new(
        WhitelistStore::open(
            Box::new(FileLoader::new(whitelist_path.clone())),
            tracker.clone(),
            settings.cache_key,
        )
        .with_context(|| format!("Failed to load whitelist {}", whitelist_path.display()))?,
    );

    let (cert_path, key_path) = config.ca_paths();
    let ca = Arc::new(
        CertificateAuthority::load_or_generate(&cert_path, &key_path)
            .context("Failed to set up interception CA")?,
    );

    let state = Arc::new(ProxyState::new(settings, whitelist.clone(), ca, tracker));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ProxyServer::bind(state, shutdown_rx)
        .await
        .context("Failed to start listeners")?;

    spawn_reload_handler(whitelist)?;
    spawn_shutdown_handler(shutdown_tx)?;

    server.run().await.context("Proxy server failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Refresh the whitelist on every SIGUSR1.
fn spawn_reload_handler(whitelist: Arc<WhitelistStore>) -> Result<()> {
    let mut reload = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    tokio::spawn(async move {
        while reload.recv().await.is_some() {
            info!("Caught SIGUSR1: refreshing whitelist");
            let store = whitelist.clone();
            match tokio::task::spawn_blocking(move || store.refresh()).await {
                Ok(Ok(count)) => info!("Whitelist refreshed with {} entries", count),
                Ok(Err(e)) => error!("Whitelist refresh failed, keeping previous entries: {}", e),
                Err(e) => error!("Whitelist refresh task failed: {}", e),
            }
        }
    });
    Ok(())
}

/// Signal both accept loops to stop on SIGINT or SIGTERM.
fn spawn_shutdown_handler(shutdown_tx: watch::Sender<bool>) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Caught SIGINT"),
            _ = terminate.recv() => info!("Caught SIGTERM"),
        }
        let _ = shutdown_tx.send(true);
    });
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors, unless `RUST_LOG` says otherwise
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
