use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::catalog_store::CatalogStore;
use crate::server_store::ServerStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedServerStore = Arc<dyn ServerStore>;
/// `None` when the service runs with the scheduler disabled.
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub catalog_store: GuardedCatalogStore,
    pub server_store: GuardedServerStore,
    pub scheduler_handle: OptionalSchedulerHandle,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog_store: GuardedCatalogStore,
        server_store: GuardedServerStore,
        scheduler_handle: OptionalSchedulerHandle,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            catalog_store,
            server_store,
            scheduler_handle,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for GuardedServerStore {
    fn from_ref(input: &ServerState) -> Self {
        input.server_store.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}
