mod file_config;

pub use file_config::{
    BackgroundJobsConfig, FetchConfig, FileConfig, GovernorConfig, SyncConfig,
};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub base_url: Option<String>,
    pub cookie: Option<String>,
    pub clearance_token: Option<String>,
    pub no_scheduler: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub run_scheduler: bool,

    pub fetch: FetchSettings,
    pub governor: GovernorSettings,
    pub sync: SyncSettings,
    pub scheduler: SchedulerSettings,
}

pub const DEFAULT_BASE_URL: &str = "https://www.metal-archives.com";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub cookie: Option<String>,
    pub clearance_token: Option<String>,
    /// Empty means the built-in pool.
    pub user_agents: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            cookie: None,
            clearance_token: None,
            user_agents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GovernorSettings {
    pub min_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub max_rate_limit_attempts: u32,
    pub max_transient_attempts: u32,
    pub transient_base_ms: u64,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 3000,
            backoff_base_ms: 5000,
            max_backoff_ms: 60_000,
            max_rate_limit_attempts: 3,
            max_transient_attempts: 3,
            transient_base_ms: 2000,
        }
    }
}

impl GovernorSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub band_page_size: usize,
    pub upcoming_page_size: usize,
    /// Bands per album sync partition.
    pub album_page_size: usize,
    pub album_shards: u32,
    /// Bands synced more recently than this are skipped by album sync.
    pub album_stale_days: i64,
    /// Attempts per band in album sync.
    pub band_attempts: u32,
    pub digest_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            band_page_size: 500,
            upcoming_page_size: 100,
            album_page_size: 50,
            album_shards: 1,
            album_stale_days: 30,
            band_attempts: 3,
            digest_days: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub band_catalog_cron: String,
    pub latest_bands_cron: String,
    pub album_sync_cron: String,
    /// Run album sync every this many minutes instead of on `album_sync_cron`.
    pub album_sync_interval_mins: Option<u64>,
    pub upcoming_releases_cron: String,
    pub release_digest_cron: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            band_catalog_cron: "0 3 * * 0".to_string(),
            latest_bands_cron: "0 4 * * *".to_string(),
            album_sync_cron: "0 */6 * * *".to_string(),
            album_sync_interval_mins: None,
            upcoming_releases_cron: "30 5 * * *".to_string(),
            release_digest_cron: "0 9 * * 1".to_string(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let run_scheduler = file.run_scheduler.unwrap_or(!cli.no_scheduler);

        let fetch_file = file.fetch.unwrap_or_default();
        let fetch_defaults = FetchSettings::default();
        let fetch = FetchSettings {
            base_url: file
                .base_url
                .or_else(|| cli.base_url.clone())
                .unwrap_or(fetch_defaults.base_url),
            timeout_secs: fetch_file
                .timeout_secs
                .unwrap_or(fetch_defaults.timeout_secs),
            cookie: fetch_file.cookie.or_else(|| cli.cookie.clone()),
            clearance_token: fetch_file
                .clearance_token
                .or_else(|| cli.clearance_token.clone()),
            user_agents: fetch_file.user_agents.unwrap_or_default(),
        };

        let gov_file = file.governor.unwrap_or_default();
        let gov_defaults = GovernorSettings::default();
        let governor = GovernorSettings {
            min_interval_ms: gov_file
                .min_interval_ms
                .unwrap_or(gov_defaults.min_interval_ms),
            backoff_base_ms: gov_file
                .backoff_base_ms
                .unwrap_or(gov_defaults.backoff_base_ms),
            max_backoff_ms: gov_file
                .max_backoff_ms
                .unwrap_or(gov_defaults.max_backoff_ms),
            max_rate_limit_attempts: gov_file
                .max_rate_limit_attempts
                .unwrap_or(gov_defaults.max_rate_limit_attempts),
            max_transient_attempts: gov_file
                .max_transient_attempts
                .unwrap_or(gov_defaults.max_transient_attempts),
            transient_base_ms: gov_file
                .transient_base_ms
                .unwrap_or(gov_defaults.transient_base_ms),
        };

        let sync_file = file.sync.unwrap_or_default();
        let sync_defaults = SyncSettings::default();
        let sync = SyncSettings {
            band_page_size: sync_file
                .band_page_size
                .unwrap_or(sync_defaults.band_page_size),
            upcoming_page_size: sync_file
                .upcoming_page_size
                .unwrap_or(sync_defaults.upcoming_page_size),
            album_page_size: sync_file
                .album_page_size
                .unwrap_or(sync_defaults.album_page_size),
            album_shards: sync_file
                .album_shards
                .unwrap_or(sync_defaults.album_shards),
            album_stale_days: sync_file
                .album_stale_days
                .unwrap_or(sync_defaults.album_stale_days),
            band_attempts: sync_file
                .band_attempts
                .unwrap_or(sync_defaults.band_attempts),
            digest_days: sync_file.digest_days.unwrap_or(sync_defaults.digest_days),
        };
        if sync.album_shards == 0 {
            bail!("sync.album_shards must be at least 1");
        }
        if sync.band_page_size == 0 || sync.upcoming_page_size == 0 || sync.album_page_size == 0 {
            bail!("sync page sizes must be at least 1");
        }

        let jobs_file = file.background_jobs.unwrap_or_default();
        let jobs_defaults = SchedulerSettings::default();
        let scheduler = SchedulerSettings {
            max_concurrent: jobs_file
                .max_concurrent
                .unwrap_or(jobs_defaults.max_concurrent),
            band_catalog_cron: jobs_file
                .band_catalog_cron
                .unwrap_or(jobs_defaults.band_catalog_cron),
            latest_bands_cron: jobs_file
                .latest_bands_cron
                .unwrap_or(jobs_defaults.latest_bands_cron),
            album_sync_cron: jobs_file
                .album_sync_cron
                .unwrap_or(jobs_defaults.album_sync_cron),
            album_sync_interval_mins: jobs_file
                .album_sync_interval_mins
                .or(jobs_defaults.album_sync_interval_mins),
            upcoming_releases_cron: jobs_file
                .upcoming_releases_cron
                .unwrap_or(jobs_defaults.upcoming_releases_cron),
            release_digest_cron: jobs_file
                .release_digest_cron
                .unwrap_or(jobs_defaults.release_digest_cron),
        };
        if scheduler.max_concurrent == 0 {
            bail!("background_jobs.max_concurrent must be at least 1");
        }
        if scheduler.album_sync_interval_mins == Some(0) {
            bail!("background_jobs.album_sync_interval_mins must be at least 1");
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            run_scheduler,
            fetch,
            governor,
            sync,
            scheduler,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
