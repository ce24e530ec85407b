use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use catalog_sync::background_jobs::jobs::build_jobs;
use catalog_sync::background_jobs::{create_scheduler, JobContext};
use catalog_sync::catalog_store::{CatalogStore, SqliteCatalogStore};
use catalog_sync::config;
use catalog_sync::fetch::{BrowserLauncher, CatalogEndpoints};
use catalog_sync::governor::RateGovernor;
use catalog_sync::server::state::ServerState;
use catalog_sync::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use catalog_sync::server_store::SqliteServerStore;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (catalog.db, server.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port of the admin API.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the upstream catalog.
    #[clap(long)]
    pub base_url: Option<String>,

    /// Raw `Cookie` header to send upstream, copied from a browser session.
    #[clap(long)]
    pub cookie: Option<String>,

    /// Anti-bot clearance token to send upstream.
    #[clap(long)]
    pub clearance_token: Option<String>,

    /// Serve the admin API only, without running any sync job.
    #[clap(long)]
    pub no_scheduler: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            base_url: args.base_url.clone(),
            cookie: args.cookie.clone(),
            clearance_token: args.clearance_token.clone(),
            no_scheduler: args.no_scheduler,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  upstream: {}", app_config.fetch.base_url);
    info!("  album shards: {}", app_config.sync.album_shards);

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!(
        "Opening SQLite catalog database at {:?}...",
        app_config.catalog_db_path()
    );
    let catalog_store = Arc::new(SqliteCatalogStore::new(app_config.catalog_db_path())?);
    metrics::set_catalog_counts(
        catalog_store.get_bands_count(),
        catalog_store.get_albums_count(),
        catalog_store.get_tracks_count(),
        catalog_store.get_upcoming_count(),
    );

    info!(
        "Opening SQLite server database at {:?}...",
        app_config.server_db_path()
    );
    let server_store = Arc::new(SqliteServerStore::new(app_config.server_db_path())?);

    let shutdown_token = CancellationToken::new();
    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
    };

    if !app_config.run_scheduler {
        info!("Scheduler disabled, serving the admin API only");
        let state = ServerState::new(server_config, catalog_store, server_store, None);
        info!("Ready to serve at port {}!", app_config.port);
        return tokio::select! {
            result = run_server(state, shutdown_token.clone()) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                shutdown_token.cancel();
                Ok(())
            }
        };
    }

    // Set up background job scheduler
    let (hook_sender, hook_receiver) = mpsc::channel(100);
    let job_context = JobContext::new(
        shutdown_token.child_token(),
        catalog_store.clone(),
        server_store.clone(),
        Arc::new(BrowserLauncher::new(app_config.fetch.clone())),
        Arc::new(RateGovernor::new(&app_config.governor)),
        CatalogEndpoints::new(&app_config.fetch.base_url),
        app_config.sync.clone(),
    );

    let (mut scheduler, scheduler_handle) = create_scheduler(
        server_store.clone(),
        hook_receiver,
        shutdown_token.clone(),
        job_context,
        app_config.scheduler.max_concurrent,
    );

    for job in build_jobs(
        &app_config.scheduler,
        &app_config.sync,
        server_store.clone(),
    )? {
        scheduler.register_job(job).await;
    }

    info!(
        "Job scheduler initialized with {} job(s) on {} worker(s)",
        scheduler.job_count().await,
        scheduler.worker_count()
    );

    // Keep the sender alive so the hook channel stays open
    let _hook_sender = hook_sender;

    let state = ServerState::new(
        server_config,
        catalog_store,
        server_store,
        Some(scheduler_handle),
    );

    info!("Ready to serve at port {}!", app_config.port);

    // Run HTTP server and job scheduler concurrently
    tokio::select! {
        result = run_server(state, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        _ = scheduler.run() => {
            info!("Scheduler stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Give the scheduler a moment to shut down gracefully
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
