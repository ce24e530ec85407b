use super::{new_band, ExhaustionPolicy, Page, SyncError, SyncResources, SyncStrategy};
use crate::catalog_store::{NewBand, UpsertOutcome};
use crate::extractor::{extract_band_summary, extract_listing_rows, extract_total_records};
use crate::fetch::FetchError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

/// Letter partitions of the alphabetical band listing, in crawl order.
pub const LETTER_PARTITIONS: [&str; 28] = [
    "NBR", "~", "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P",
    "Q", "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
];

/// Full sweep of the alphabetical band listing.
pub struct BandCatalogSync {
    resources: SyncResources,
    page_size: usize,
}

impl BandCatalogSync {
    pub const TASK_NAME: &'static str = "band_catalog_sync";

    pub fn new(resources: SyncResources, page_size: usize) -> Self {
        Self {
            resources,
            page_size,
        }
    }
}

#[async_trait]
impl SyncStrategy for BandCatalogSync {
    type Raw = Value;
    type Item = NewBand;

    fn task_name(&self) -> &str {
        Self::TASK_NAME
    }

    fn partitions(&self) -> anyhow::Result<Vec<String>> {
        Ok(LETTER_PARTITIONS.iter().map(|p| p.to_string()).collect())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(&self, partition: &str, offset: usize) -> Result<Value, FetchError> {
        let url = self
            .resources
            .endpoints
            .letter_listing(partition, offset, self.page_size);
        self.resources
            .fetch_json(&format!("letter {} @{}", partition, offset), &url)
            .await
    }

    fn extract(&self, raw: Value) -> Page<NewBand> {
        let rows = extract_listing_rows(&raw);
        let items = rows
            .iter()
            .filter_map(|row| {
                let band = new_band(&extract_band_summary(row));
                if band.is_none() {
                    warn!("Dropping band row without id: {:?}", row.first());
                }
                band
            })
            .collect();
        Page {
            items,
            raw_len: rows.len(),
            total: extract_total_records(&raw),
        }
    }

    async fn resolve(&self, items: Vec<NewBand>) -> Result<Vec<NewBand>, SyncError> {
        // Known bands are left to the store's first-write-wins insert.
        Ok(items)
    }

    async fn persist(
        &self,
        _partition: &str,
        items: Vec<NewBand>,
    ) -> Result<UpsertOutcome, SyncError> {
        Ok(self.resources.catalog_store.upsert_bands(&items)?)
    }

    fn on_exhausted(&self) -> ExhaustionPolicy {
        ExhaustionPolicy::AbortRun
    }

    fn checkpointed(&self) -> bool {
        true
    }
}
