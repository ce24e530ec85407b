use crate::catalog_store::CatalogStore;
use crate::config::SyncSettings;
use crate::fetch::{CatalogEndpoints, SourceFactory};
use crate::governor::RateGovernor;
use crate::server_store::ServerStore;
use crate::sync::{PaginatedSyncDriver, SyncResources};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// The scheduler hands every run its own copy carrying a fresh cancellation
/// token. Everything else is shared between runs.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Bands, albums, tracks and upcoming releases.
    pub catalog_store: Arc<dyn CatalogStore>,

    /// Run log, schedules, checkpoints and audit log.
    pub server_store: Arc<dyn ServerStore>,

    /// Opens the upstream source for one run.
    pub source_factory: Arc<dyn SourceFactory>,

    /// Shared by all runs so pacing holds across jobs.
    pub governor: Arc<RateGovernor>,

    pub endpoints: CatalogEndpoints,

    pub sync: SyncSettings,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        catalog_store: Arc<dyn CatalogStore>,
        server_store: Arc<dyn ServerStore>,
        source_factory: Arc<dyn SourceFactory>,
        governor: Arc<RateGovernor>,
        endpoints: CatalogEndpoints,
        sync: SyncSettings,
    ) -> Self {
        Self {
            cancellation_token,
            catalog_store,
            server_store,
            source_factory,
            governor,
            endpoints,
            sync,
        }
    }

    /// Same context, different cancellation token.
    pub fn with_cancellation_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Launch a source for this run. The source is closed when the returned
    /// resources are dropped.
    pub fn sync_resources(&self) -> Result<SyncResources> {
        Ok(SyncResources {
            source: self.source_factory.launch()?,
            governor: self.governor.clone(),
            catalog_store: self.catalog_store.clone(),
            endpoints: self.endpoints.clone(),
        })
    }

    pub fn sync_driver(&self) -> PaginatedSyncDriver {
        PaginatedSyncDriver::new(self.server_store.clone(), self.cancellation_token.clone())
    }
}
