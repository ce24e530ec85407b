//! Sync orchestrators.
//!
//! Every sync task is a [`SyncStrategy`] run by the shared
//! [`PaginatedSyncDriver`]: partitions are processed one after the other,
//! each page goes through fetch, extract, resolve and persist, and a
//! partition is fully persisted before the next one starts.

mod album;
mod band_catalog;
mod driver;
mod latest_bands;
mod state;
mod upcoming;

pub use album::{stale_before, AlbumSync};
pub use band_catalog::{BandCatalogSync, LETTER_PARTITIONS};
pub use driver::{checkpoint_key, PaginatedSyncDriver, SyncReport};
pub use latest_bands::LatestBandsSync;
pub use state::SyncState;
pub use upcoming::UpcomingReleasesSync;

use crate::catalog_store::{CatalogStore, NewBand, UpsertOutcome};
use crate::extractor::{extract_band_country, BandSummary};
use crate::fetch::{CatalogEndpoints, CatalogSource, FetchError};
use crate::genres::normalize_genres;
use crate::governor::RateGovernor;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Retry budget ran out.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Sync cancelled")]
    Cancelled,
}

/// What to do when a page cannot be fetched within the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    AbortRun,
    SkipPartition,
}

/// One extracted page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows the upstream returned, usable or not. Drives pagination.
    pub raw_len: usize,
    /// Total the upstream reports for the partition, when it does.
    pub total: Option<usize>,
}

#[async_trait]
pub trait SyncStrategy: Send + Sync {
    type Raw: Send;
    type Item: Send;

    /// Name used for the run log, audit log, checkpoints and metrics.
    fn task_name(&self) -> &str;

    fn partitions(&self) -> anyhow::Result<Vec<String>>;

    fn page_size(&self) -> usize;

    async fn fetch_page(&self, partition: &str, offset: usize) -> Result<Self::Raw, FetchError>;

    fn extract(&self, raw: Self::Raw) -> Page<Self::Item>;

    /// Match items against stored rows. May drop items.
    async fn resolve(&self, items: Vec<Self::Item>) -> Result<Vec<Self::Item>, SyncError>;

    async fn persist(
        &self,
        partition: &str,
        items: Vec<Self::Item>,
    ) -> Result<UpsertOutcome, SyncError>;

    fn on_exhausted(&self) -> ExhaustionPolicy;

    /// Whether completed partitions are checkpointed so an interrupted run
    /// can resume.
    fn checkpointed(&self) -> bool {
        false
    }
}

/// What a strategy needs to talk to the upstream and the store during one run.
#[derive(Clone)]
pub struct SyncResources {
    pub source: Arc<dyn CatalogSource>,
    pub governor: Arc<RateGovernor>,
    pub catalog_store: Arc<dyn CatalogStore>,
    pub endpoints: CatalogEndpoints,
}

impl SyncResources {
    pub async fn fetch_json(&self, label: &str, url: &str) -> Result<serde_json::Value, FetchError> {
        let source = self.source.as_ref();
        self.governor
            .call(label, || source.fetch_json(url))
            .await
    }

    pub async fn fetch_html(&self, label: &str, url: &str) -> Result<String, FetchError> {
        let source = self.source.as_ref();
        self.governor
            .call(label, || source.fetch_html(url))
            .await
    }

    /// Country of origin from the band's own page.
    pub async fn fetch_band_country(&self, slug: &str, external_id: i64) -> Result<String, FetchError> {
        let url = self.endpoints.band_page(slug, external_id);
        let html = self
            .fetch_html(&format!("band page {}", external_id), &url)
            .await?;
        Ok(extract_band_country(&html))
    }
}

/// Insert payload for a listed band. `None` without an upstream id.
pub fn new_band(summary: &BandSummary) -> Option<NewBand> {
    Some(NewBand {
        external_id: summary.external_id?,
        slug: summary.slug.clone(),
        display_name: summary.display_name.clone(),
        country_of_origin: summary.country_of_origin.clone(),
        genre_tags: normalize_genres(&summary.raw_genres),
        lifecycle_status: summary.status.clone(),
    })
}

#[cfg(test)]
pub(crate) mod testing;
