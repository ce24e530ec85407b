use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub base_url: Option<String>,
    pub run_scheduler: Option<bool>,

    // Feature configs
    pub fetch: Option<FetchConfig>,
    pub governor: Option<GovernorConfig>,
    pub sync: Option<SyncConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: Option<u64>,
    /// Raw `Cookie` header value copied from a browser session.
    pub cookie: Option<String>,
    pub clearance_token: Option<String>,
    pub user_agents: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GovernorConfig {
    pub min_interval_ms: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_rate_limit_attempts: Option<u32>,
    pub max_transient_attempts: Option<u32>,
    pub transient_base_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub band_page_size: Option<usize>,
    pub upcoming_page_size: Option<usize>,
    pub album_page_size: Option<usize>,
    pub album_shards: Option<u32>,
    pub album_stale_days: Option<i64>,
    pub band_attempts: Option<u32>,
    pub digest_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub max_concurrent: Option<usize>,
    pub band_catalog_cron: Option<String>,
    pub latest_bands_cron: Option<String>,
    pub album_sync_cron: Option<String>,
    pub album_sync_interval_mins: Option<u64>,
    pub upcoming_releases_cron: Option<String>,
    pub release_digest_cron: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
