// src/config.rs

//! Manages proxy configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Selects which built-in distributions are active.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    #[default]
    All,
    Ubuntu,
    Debian,
    Centos,
    Alpine,
}

impl ProxyMode {
    /// Returns `true` if a distribution identifier is active under this mode.
    pub fn includes(&self, ident: &str) -> bool {
        match self {
            ProxyMode::All => true,
            ProxyMode::Ubuntu => ident == "ubuntu",
            ProxyMode::Debian => ident == "debian",
            ProxyMode::Centos => ident == "centos",
            ProxyMode::Alpine => ident == "alpine",
        }
    }
}

/// Configuration for the on-disk cache.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// The root directory of the cache tree. Created if absent.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// The soft ceiling for total cached bytes. `0` disables size-based eviction.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    /// Entries older than this are removed by cleanup. `0` disables TTL eviction.
    #[serde(default, with = "humantime_serde")]
    pub ttl: Duration,
    /// How often the background cleanup cycle runs. `0` disables the loop.
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size_bytes: default_max_size_bytes(),
            ttl: Duration::ZERO,
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./pakmirror-cache")
}
fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(3600) // 1 hour
}

/// Configuration for the mirror benchmark.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BenchmarkConfig {
    /// How many times each candidate is probed; the mean latency is ranked.
    #[serde(default = "default_benchmark_tries")]
    pub tries: u32,
    /// The maximum number of probes running concurrently.
    #[serde(default = "default_benchmark_concurrency")]
    pub concurrency: usize,
    /// How many successful measurements are collected before ranking.
    #[serde(default = "default_benchmark_take")]
    pub take: usize,
    /// The per-probe request timeout.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// The deadline for a whole benchmark round.
    #[serde(default = "default_overall_timeout", with = "humantime_serde")]
    pub overall_timeout: Duration,
    /// How long a ranked winner stays valid before a fresh benchmark is required.
    #[serde(default = "default_result_ttl", with = "humantime_serde")]
    pub result_ttl: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            tries: default_benchmark_tries(),
            concurrency: default_benchmark_concurrency(),
            take: default_benchmark_take(),
            probe_timeout: default_probe_timeout(),
            overall_timeout: default_overall_timeout(),
            result_ttl: default_result_ttl(),
        }
    }
}

fn default_benchmark_tries() -> u32 {
    3
}
fn default_benchmark_concurrency() -> usize {
    8
}
fn default_benchmark_take() -> usize {
    3
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_overall_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_result_ttl() -> Duration {
    Duration::from_secs(24 * 3600) // 24 hours
}

/// Configuration for the upstream retrying transport.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    /// The maximum number of attempts for a single upstream request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// The base delay of the exponential backoff.
    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// The upper bound on a single backoff delay.
    #[serde(default = "default_retry_max_delay", with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// The connect timeout for upstream requests.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> Duration {
    Duration::from_millis(200)
}
fn default_retry_max_delay() -> Duration {
    Duration::from_secs(5)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Configuration for the admin HTTP listener (stats, purge, cleanup, refresh, metrics).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdminConfig {
    /// If true, the admin HTTP server is started.
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,
    /// The port for the admin server.
    #[serde(default = "default_admin_port")]
    pub port: u16,
    /// A shared secret required as a bearer token on mutating admin routes.
    /// Empty disables the check.
    #[serde(default)]
    pub secret: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_admin_enabled(),
            port: default_admin_port(),
            secret: String::new(),
        }
    }
}

fn default_admin_enabled() -> bool {
    true
}
fn default_admin_port() -> u16 {
    3143
}

/// The top-level proxy configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Which distributions this instance serves.
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    /// Per-distribution mirror overrides, keyed by distribution identifier.
    /// A value is either a full URL or an alias from the distribution's alias map.
    /// An override pins the binding and disables benchmarking for that distribution.
    #[serde(default)]
    pub mirrors: HashMap<String, String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3142
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: ProxyMode::default(),
            cache: CacheConfig::default(),
            benchmark: BenchmarkConfig::default(),
            upstream: UpstreamConfig::default(),
            admin: AdminConfig::default(),
            mirrors: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file and validates it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.benchmark.tries == 0 {
            return Err(anyhow!("benchmark.tries must be at least 1"));
        }
        if self.benchmark.concurrency == 0 {
            return Err(anyhow!("benchmark.concurrency must be at least 1"));
        }
        if self.upstream.max_retries == 0 {
            return Err(anyhow!("upstream.max_retries must be at least 1"));
        }
        if self.cache.dir.as_os_str().is_empty() {
            return Err(anyhow!("cache.dir must not be empty"));
        }
        Ok(())
    }
}
