//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults (applied when settings are resolved)
//! 2. System config: `/etc/sni-warden/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sni-warden/config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with the default system path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
        }
    }

    /// Create a ConfigLoader with a custom system path (for testing).
    #[must_use]
    pub fn with_system_path(system_path: PathBuf) -> Self {
        Self { system_path }
    }

    /// Load and merge configuration from all sources.
    ///
    /// A missing system config is skipped; a missing `--config` file is an
    /// error. Invalid TOML is always an error.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(path) = &cli.config {
            // Unlike the system config, a file named on the command line must exist.
            let extra = self
                .load_file(path)?
                .ok_or_else(|| ConfigError::Missing { path: path.clone() })?;
            config.merge(extra);
            debug!("Loaded additional config from {:?}", path);
        }

        config.merge(Self::from_cli(cli));
        Ok(config)
    }

    /// The configuration expressed by CLI flags alone.
    fn from_cli(cli: &Cli) -> Config {
        let mut config = Config::default();
        config.listen.http = cli.http_addr.clone();
        config.listen.tls = cli.tls_addr.clone();
        config.whitelist.path = cli.whitelist.clone();
        config.whitelist.cache_key = cli.cache_key;
        config.policy.non_sni = cli.non_sni;
        config.ca.cert = cli.ca_cert.clone();
        config.ca.key = cli.ca_key.clone();
        config.tracker.sinks = cli.trackers.clone();
        config.tracker.statsd_addr = cli.statsd.clone();
        config.tracker.influx_addr = cli.influx.clone();
        if cli.verbose > 0 {
            config.general.verbose = Some(true);
        }
        config
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkKind;
    use crate::proxy::NonSniPolicy;
    use crate::whitelist::CacheKey;
    use tempfile::tempdir;

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_system_path(dir.path().join("nonexistent.toml"));

        let config = loader.load(&Cli::default()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_system_path(dir.path().join("nonexistent.toml"));
        let cli = Cli {
            config: Some(dir.path().join("missing.toml")),
            ..Cli::default()
        };

        assert!(matches!(
            loader.load(&cli),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("config.toml");
        fs::write(&system, "[listen\nhttp = 1").unwrap();

        let loader = ConfigLoader::with_system_path(system);
        assert!(matches!(
            loader.load(&Cli::default()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_hierarchy_merge() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("system.toml");
        let extra = dir.path().join("extra.toml");
        fs::write(
            &system,
            r#"
            [listen]
            http = ":3128"
            tls = ":3129"

            [policy]
            non_sni = "reject"

            [tracker]
            sinks = ["statsd"]
            "#,
        )
        .unwrap();
        fs::write(
            &extra,
            r#"
            [listen]
            tls = ":4443"

            [whitelist]
            cache_key = "origin"
            "#,
        )
        .unwrap();

        let loader = ConfigLoader::with_system_path(system);
        let cli = Cli {
            config: Some(extra),
            http_addr: Some("127.0.0.1:8080".to_string()),
            trackers: vec![SinkKind::Log],
            verbose: 1,
            ..Cli::default()
        };
        let config = loader.load(&cli).unwrap();

        assert_eq!(config.listen.http.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(config.listen.tls.as_deref(), Some(":4443"));
        assert_eq!(config.policy.non_sni, Some(NonSniPolicy::Reject));
        assert_eq!(config.whitelist.cache_key, Some(CacheKey::Origin));
        assert_eq!(config.tracker.sinks, vec![SinkKind::Log]);
        assert_eq!(config.general.verbose, Some(true));
    }
}
