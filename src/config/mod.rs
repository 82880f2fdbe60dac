use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{Market, SectorSlug};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Which body the reader proxy is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFormat {
    /// Markdown first, plain text if markdown could not be fetched.
    #[default]
    Auto,
    #[serde(alias = "markdown")]
    Md,
    Text,
}

impl FromStr for FetchFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "md" | "markdown" => Ok(Self::Md),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown format '{other}' (auto, md, text)")),
        }
    }
}

/// Proxy fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed part of the wait after an HTTP 429.
    #[serde(default = "default_rate_limit_base_ms")]
    pub rate_limit_base_ms: u64,

    #[serde(default = "default_rate_limit_jitter_min_ms")]
    pub rate_limit_jitter_min_ms: u64,

    #[serde(default = "default_rate_limit_jitter_max_ms")]
    pub rate_limit_jitter_max_ms: u64,

    /// One "second" of the timeout / error backoff schedules.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    #[serde(default)]
    pub format: FetchFormat,

    #[serde(default)]
    pub no_cache: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_sectors")]
    pub sectors: Vec<SectorSlug>,

    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,

    #[serde(default)]
    pub save_raw: bool,

    #[serde(default)]
    pub market: Market,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_proxy_prefix() -> String {
    "https://r.jina.ai/".to_string()
}
fn default_base_url() -> String {
    "https://www.set.or.th/en".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_rate_limit_base_ms() -> u64 {
    2000
}
fn default_rate_limit_jitter_min_ms() -> u64 {
    1000
}
fn default_rate_limit_jitter_max_ms() -> u64 {
    3000
}
fn default_backoff_unit_ms() -> u64 {
    1000
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/set.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    4
}
fn default_sectors() -> Vec<SectorSlug> {
    SectorSlug::ALL.to_vec()
}
fn default_retry_rounds() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_out_dir() -> PathBuf {
    PathBuf::from("_out")
}
fn default_csv_delimiter() -> char {
    ','
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            proxy_prefix: default_proxy_prefix(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            max_attempts: default_max_attempts(),
            rate_limit_base_ms: default_rate_limit_base_ms(),
            rate_limit_jitter_min_ms: default_rate_limit_jitter_min_ms(),
            rate_limit_jitter_max_ms: default_rate_limit_jitter_max_ms(),
            backoff_unit_ms: default_backoff_unit_ms(),
            format: FetchFormat::default(),
            no_cache: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            sectors: default_sectors(),
            retry_rounds: default_retry_rounds(),
            retry_delay_ms: default_retry_delay_ms(),
            out_dir: default_out_dir(),
            csv_delimiter: default_csv_delimiter(),
            save_raw: false,
            market: Market::default(),
        }
    }
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("SET").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(app_cfg)
    }

    /// CSV delimiter as the single byte the csv crate wants.
    pub fn csv_delimiter(&self) -> u8 {
        u8::try_from(self.pipeline.csv_delimiter).unwrap_or(b',')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_sectors() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.sectors.len(), 8);
        assert_eq!(cfg.pipeline.concurrency, 4);
        assert_eq!(cfg.scraper.max_attempts, 3);
        assert_eq!(cfg.pipeline.retry_rounds, 2);
        assert_eq!(cfg.csv_delimiter(), b',');
    }

    #[test]
    fn partial_toml_falls_back_to_field_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nconcurrency = 2\nsectors = [\"agro\", \"tech\"]\n[scraper]\nformat = \"text\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pipeline.concurrency, 2);
        assert_eq!(cfg.pipeline.sectors, vec![SectorSlug::Agro, SectorSlug::Tech]);
        assert_eq!(cfg.scraper.format, FetchFormat::Text);
        assert_eq!(cfg.scraper.proxy_prefix, "https://r.jina.ai/");
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/set.duckdb"));
    }

    #[test]
    fn fetch_format_parses_cli_spellings() {
        assert_eq!("md".parse::<FetchFormat>().unwrap(), FetchFormat::Md);
        assert_eq!("Markdown".parse::<FetchFormat>().unwrap(), FetchFormat::Md);
        assert!("html".parse::<FetchFormat>().is_err());
    }
}
