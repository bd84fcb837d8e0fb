//! Configuration file management for `opq`.
//!
//! Provides a TOML-based config file at `~/.config/opq/config.toml` plus
//! the layered resolution chain this codebase always uses: CLI flag > env
//! var > config file > built-in default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use opq_core::config::{PollerConfig, RetryMode, ServicePolicy};
use opq_db::config::DbConfig;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub poller: PollerSection,
    #[serde(default)]
    pub services: Vec<ServiceSection>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            database: DatabaseSection::default(),
            poller: PollerSection::default(),
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollerSection {
    pub tick_interval_secs: u64,
    pub max_retries: i32,
    /// `"leave-failed"` or `"requeue-immediately"`.
    pub retry_mode: String,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: PollerConfig::DEFAULT_TICK_INTERVAL.as_secs(),
            max_retries: 3,
            retry_mode: RetryMode::default().to_string(),
        }
    }
}

/// One `[[services]]` entry: a policy plus which reference handler to wire
/// it to. Real downstream handlers (IAM, IOT, ...) are out of scope for
/// this crate; `handler` selects one of the bundled demo handlers so `opq
/// run` is exercisable end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub service_name: String,
    pub per_sku_limit: i64,
    pub max_concurrency: i64,
    /// `"succeed"`, `"fail"`, or `"latency:<millis>"`.
    pub handler: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the `opq` config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/opq` or `~/.config/opq`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("opq");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("opq")
}

/// Return the path to the `opq` config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file. Returns `None` if it does not exist.
pub fn load_config(path: Option<&std::path::Path>) -> Result<Option<ConfigFile>> {
    let path = path.map(PathBuf::from).unwrap_or_else(config_path);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile, path: Option<&std::path::Path>) -> Result<PathBuf> {
    let path = path.map(PathBuf::from).unwrap_or_else(config_path);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use by the CLI's commands.
#[derive(Debug)]
pub struct OpqConfig {
    pub db_config: DbConfig,
    pub poller_config: PollerConfig,
    pub services: Vec<ServiceSection>,
}

impl OpqConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > built-in default.
    ///
    /// - DB URL: `cli_db_url` > `OPQ_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`.
    /// - Poller settings and service policies come from the config file
    ///   only (there is no sensible per-flag override for a whole policy
    ///   table); absent a file, the poller falls back to defaults and no
    ///   services are registered.
    pub fn resolve(cli_db_url: Option<&str>, config_path: Option<&std::path::Path>) -> Result<Self> {
        let file_config = load_config(config_path)?;

        let db_url = if let Some(url) = cli_db_url {
            url.to_owned()
        } else if let Ok(url) = std::env::var("OPQ_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_owned()
        };

        let (poller_config, services) = match file_config {
            Some(cfg) => {
                let retry_mode: RetryMode = cfg
                    .poller
                    .retry_mode
                    .parse()
                    .context("invalid poller.retry_mode in config file")?;
                let poller_config = PollerConfig::new(
                    Duration::from_secs(cfg.poller.tick_interval_secs),
                    cfg.poller.max_retries,
                    retry_mode,
                );
                (poller_config, cfg.services)
            }
            None => (PollerConfig::default(), Vec::new()),
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
            poller_config,
            services,
        })
    }
}

/// Build a [`ServicePolicy`] from a config file entry.
pub fn service_policy(section: &ServiceSection) -> Result<ServicePolicy> {
    ServicePolicy::new(
        section.service_name.clone(),
        section.per_sku_limit,
        section.max_concurrency,
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))
}
