//! TOML configuration parsing.
//!
//! Everything the pipeline consumes as an opaque capability (API key, object
//! store credentials, database location) is resolved here, before the
//! orchestrator runs.
//!
//! ```toml
//! [db]
//! path = "./data/weather.sqlite"
//!
//! [api]
//! url = "https://api.weatherapi.com/v1/history.json"
//! timeout_secs = 10
//! cache_ttl_secs = 30
//!
//! [s3]
//! bucket = "weather"
//! region = "eu-central-1"
//! endpoint_url = "http://localhost:9000"
//!
//! [pipeline]
//! table = "weather_raw"
//! default_city = "Minsk"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub api: ApiConfig,
    pub s3: S3Config,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub url: String,
    /// Falls back to `WEATHER_API_KEY` when absent.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}
fn default_cache_ttl_secs() -> u64 {
    30
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// The configured API key, or `WEATHER_API_KEY` from the environment.
    pub fn resolve_key(&self) -> Result<String> {
        if let Some(key) = &self.key {
            return Ok(key.clone());
        }
        std::env::var("WEATHER_API_KEY")
            .context("api.key not set and WEATHER_API_KEY environment variable not set")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_region() -> String {
    "eu-central-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_city")]
    pub default_city: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            default_city: default_city(),
            retries: 0,
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_table() -> String {
    "weather_raw".to_string()
}
fn default_city() -> String {
    "Minsk".to_string()
}
fn default_retry_delay_secs() -> u64 {
    5
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Returns true for a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.api.url.trim().is_empty() {
        bail!("api.url must not be empty");
    }
    if config.api.timeout_secs == 0 {
        bail!("api.timeout_secs must be > 0");
    }
    if config.s3.bucket.trim().is_empty() {
        bail!("s3.bucket must not be empty");
    }
    if !is_valid_identifier(&config.pipeline.table) {
        bail!(
            "pipeline.table must be a plain SQL identifier, got '{}'",
            config.pipeline.table
        );
    }
    Ok(())
}
