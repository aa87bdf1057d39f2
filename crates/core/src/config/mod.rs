//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FULLPAGE_*)
//! 2. TOML config file (if FULLPAGE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod cache;
mod validation;

pub use cache::{BackendKind, CacheConfig, InvalidationMethod};
pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FULLPAGE_*)
/// 2. TOML config file (if FULLPAGE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network-wide cache configuration.
    ///
    /// When present it applies to every host and per-site entries are ignored.
    /// With neither this nor a matching site entry, caching is disabled.
    #[serde(default)]
    pub network: Option<CacheConfig>,

    /// Per-host cache configuration, keyed by the request `Host`.
    #[serde(default)]
    pub sites: BTreeMap<String, CacheConfig>,

    /// Background precache settings.
    #[serde(default)]
    pub precache: PrecacheConfig,

    /// JSON manifest describing site content for invalidation and precache.
    ///
    /// Set via FULLPAGE_SITE_MANIFEST environment variable.
    #[serde(default)]
    pub site_manifest: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: None,
            sites: BTreeMap::new(),
            precache: PrecacheConfig::default(),
            site_manifest: None,
        }
    }
}

/// Settings for the detached precache worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecacheConfig {
    /// Directory holding the run-scoped work, log and pid files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Site identifier used to scope file names.
    #[serde(default = "default_site_id")]
    pub site_id: u64,

    /// Pause between two fetched URLs, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User-Agent string for precache requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Worker executable. Defaults to `fullpage-precache` next to the current executable.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    /// Recurring precache interval in seconds; unset disables timed runs.
    #[serde(default)]
    pub schedule_secs: Option<u64>,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_site_id() -> u64 {
    1
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_user_agent() -> String {
    "fullpage-precache/0.1".into()
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            site_id: default_site_id(),
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            worker_program: None,
            schedule_secs: None,
        }
    }
}

impl PrecacheConfig {
    /// Throttle interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Timeout as Duration for use with reqwest.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Recurring schedule, if configured.
    pub fn schedule(&self) -> Option<Duration> {
        self.schedule_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `FULLPAGE_`
    /// 2. TOML file from `FULLPAGE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// Like [`AppConfig::load`], with an explicit TOML file taking the place of `FULLPAGE_CONFIG_FILE`.
    pub fn load_from(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        match config_file {
            Some(path) => Self::from_figment(Self::figment_with(Some(path))),
            None => Self::load(),
        }
    }

    /// The layered provider stack used by [`AppConfig::load`].
    pub fn figment() -> Figment {
        let config_path = std::env::var_os("FULLPAGE_CONFIG_FILE").map(PathBuf::from);
        Self::figment_with(config_path.as_deref())
    }

    fn figment_with(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_path) = config_file {
            figment = figment.merge(Toml::file(config_path));
        }

        figment.merge(
            Env::prefixed("FULLPAGE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate configuration from an arbitrary provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Resolve the cache configuration that applies to `host`.
    ///
    /// A network-wide configuration wins over per-site entries. `None` means
    /// caching is disabled for the request.
    pub fn resolve(&self, host: &str) -> Option<&CacheConfig> {
        self.network.as_ref().or_else(|| self.sites.get(host))
    }

    /// Like [`AppConfig::resolve`], but reports a missing configuration as an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when no configuration covers `host`.
    pub fn require(&self, host: &str) -> Result<&CacheConfig, ConfigError> {
        self.resolve(host).ok_or_else(|| ConfigError::Missing {
            field: format!("sites.{host}"),
            hint: "Add a [network] table or a [sites.\"<host>\"] table".into(),
        })
    }
}
