//! Test server lifecycle management
//!
//! Each test gets an isolated admin server, job scheduler and pair of
//! databases, all fed by an in-memory upstream.

use super::fixtures::BASE_URL;
use super::upstream::{FakeUpstream, FakeUpstreamFactory};
use catalog_sync::background_jobs::jobs::build_jobs;
use catalog_sync::background_jobs::{create_scheduler, JobContext};
use catalog_sync::catalog_store::SqliteCatalogStore;
use catalog_sync::config::{SchedulerSettings, SyncSettings};
use catalog_sync::fetch::CatalogEndpoints;
use catalog_sync::governor::{RateGovernor, RetryPolicy};
use catalog_sync::server::state::ServerState;
use catalog_sync::server::{make_app, RequestsLoggingLevel, ServerConfig};
use catalog_sync::server_store::{ServerStore, SqliteServerStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated stores.
///
/// When dropped, the server and the scheduler shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    pub upstream: Arc<FakeUpstream>,
    pub endpoints: CatalogEndpoints,
    pub catalog_store: Arc<SqliteCatalogStore>,
    pub server_store: Arc<SqliteServerStore>,

    client: reqwest::Client,
    shutdown_token: CancellationToken,
    _hook_sender: mpsc::Sender<catalog_sync::background_jobs::HookEvent>,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Spawns a server on a random port with every sync job registered.
    ///
    /// # Panics
    ///
    /// Panics if the stores cannot be created or the port cannot be bound.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let catalog_store = Arc::new(
            SqliteCatalogStore::new(temp_dir.path().join("catalog.db"))
                .expect("Failed to open catalog store"),
        );
        let server_store = Arc::new(
            SqliteServerStore::new(temp_dir.path().join("server.db"))
                .expect("Failed to open server store"),
        );

        let upstream = Arc::new(FakeUpstream::default());
        let endpoints = CatalogEndpoints::new(BASE_URL);
        let governor = RateGovernor::with_policy(
            Duration::ZERO,
            RetryPolicy {
                max_rate_limit_attempts: 2,
                backoff_base: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                max_transient_attempts: 2,
                transient_base: Duration::from_millis(1),
            },
        );
        let sync = SyncSettings {
            upcoming_page_size: 10,
            album_page_size: 10,
            ..Default::default()
        };

        let shutdown_token = CancellationToken::new();
        let (hook_sender, hook_receiver) = mpsc::channel(10);
        let job_context = JobContext::new(
            shutdown_token.child_token(),
            catalog_store.clone(),
            server_store.clone(),
            Arc::new(FakeUpstreamFactory(upstream.clone())),
            Arc::new(governor),
            endpoints.clone(),
            sync.clone(),
        );
        let (mut scheduler, scheduler_handle) = create_scheduler(
            server_store.clone(),
            hook_receiver,
            shutdown_token.clone(),
            job_context,
            2,
        );
        let jobs = build_jobs(&SchedulerSettings::default(), &sync, server_store.clone())
            .expect("Failed to build jobs");
        for job in jobs {
            scheduler.register_job(job).await;
        }
        tokio::spawn(async move { scheduler.run().await });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let state = ServerState::new(
            config,
            catalog_store.clone(),
            server_store.clone(),
            Some(scheduler_handle),
        );
        let app = make_app(state);
        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
                .expect("Server error");
        });

        // Cron jobs get their first fire time once the scheduler loop is up
        for _ in 0..200 {
            let ready = server_store
                .get_schedule_state("band_catalog_sync")
                .expect("Failed to read schedule state")
                .is_some();
            if ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            upstream,
            endpoints,
            catalog_store,
            server_store,
            client: reqwest::Client::new(),
            shutdown_token,
            _hook_sender: hook_sender,
            _temp_dir: temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn get_json(&self, path: &str) -> Value {
        self.get(path).await.json().await.expect("Invalid JSON")
    }

    /// Polls until the job has a finished run and is no longer running.
    pub async fn wait_for_finished_run(&self, job_id: &str) -> Value {
        for _ in 0..200 {
            let job = self.get_json(&format!("/v1/jobs/{}", job_id)).await;
            let runs = self.get_json(&format!("/v1/runs?task={}", job_id)).await;
            let finished = runs
                .as_array()
                .and_then(|runs| runs.iter().find(|r| r["status"] != "started"));
            if let (Some(run), false) = (finished, job["is_running"] == true) {
                return run.clone();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Job {} did not finish in time", job_id);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
