use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use crate::locality::FusionPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// YAML document describing groups and external sources
    #[serde(default = "default_directory_path")]
    pub path: PathBuf,
    /// Upper bound on concurrent status probes during one render
    #[serde(default = "default_status_concurrency")]
    pub status_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_status_timeout")]
    pub status_timeout_ms: u64,
    #[serde(default = "default_check_ip_timeout")]
    pub check_ip_timeout_ms: u64,
    #[serde(default = "default_locality_timeout")]
    pub locality_timeout_ms: u64,
    #[serde(default)]
    pub fusion: FusionPolicy,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_upstream_timeout")]
    pub exchange_timeout_ms: u64,
}

fn default_listen() -> String {
    "[::]:3000".to_string()
}

fn default_directory_path() -> PathBuf {
    PathBuf::from("services.yaml")
}

fn default_status_concurrency() -> usize {
    8
}

fn default_status_timeout() -> u64 {
    3000
}

fn default_check_ip_timeout() -> u64 {
    1500
}

fn default_locality_timeout() -> u64 {
    2000
}

fn default_upstream_timeout() -> u64 {
    5000
}

fn default_user_agent() -> String {
    concat!("directoryd/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: default_directory_path(),
            status_concurrency: default_status_concurrency(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            status_timeout_ms: default_status_timeout(),
            check_ip_timeout_ms: default_check_ip_timeout(),
            locality_timeout_ms: default_locality_timeout(),
            fusion: FusionPolicy::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_upstream_timeout(),
            exchange_timeout_ms: default_upstream_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn check_ip_timeout(&self) -> Duration {
        Duration::from_millis(self.check_ip_timeout_ms)
    }

    pub fn locality_timeout(&self) -> Duration {
        Duration::from_millis(self.locality_timeout_ms)
    }
}

impl UpstreamConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
