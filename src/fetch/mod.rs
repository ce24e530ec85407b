//! Fetch client for the upstream catalog.

mod endpoints;
mod error;
mod session;

pub use endpoints::CatalogEndpoints;
pub use error::FetchError;
pub use session::{BrowserSession, Page, DEFAULT_USER_AGENTS};

use crate::config::FetchSettings;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Anything sync tasks can read catalog data from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// GET a JSON listing endpoint.
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError>;

    /// GET an HTML detail page.
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

/// Opens a fresh source for each sync run.
pub trait SourceFactory: Send + Sync {
    fn launch(&self) -> anyhow::Result<Arc<dyn CatalogSource>>;
}

/// Launches a [`BrowserSession`] per run.
pub struct BrowserLauncher {
    settings: FetchSettings,
}

impl BrowserLauncher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }
}

impl SourceFactory for BrowserLauncher {
    fn launch(&self) -> anyhow::Result<Arc<dyn CatalogSource>> {
        Ok(Arc::new(BrowserSession::launch(&self.settings)?))
    }
}
