use super::{new_band, ExhaustionPolicy, Page, SyncError, SyncResources, SyncStrategy};
use crate::catalog_store::{NewBand, UpsertOutcome};
use crate::extractor::{extract_latest_band_summary, extract_listing_rows, extract_total_records};
use crate::fetch::FetchError;
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use serde_json::Value;
use tracing::{debug, warn};

/// Bands added upstream during the current and the previous month.
pub struct LatestBandsSync {
    resources: SyncResources,
    page_size: usize,
    /// First day of each month to crawl, newest first.
    months: Vec<NaiveDate>,
}

fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn month_key(month: NaiveDate) -> String {
    month.format("%Y-%m").to_string()
}

impl LatestBandsSync {
    pub const TASK_NAME: &'static str = "latest_bands_sync";

    pub fn new(resources: SyncResources, page_size: usize, today: NaiveDate) -> Self {
        let current = month_start(today);
        let previous = month_start(current - Duration::days(1));
        Self {
            resources,
            page_size,
            months: vec![current, previous],
        }
    }

    fn month_for(&self, partition: &str) -> Option<NaiveDate> {
        self.months
            .iter()
            .copied()
            .find(|m| month_key(*m) == partition)
    }
}

#[async_trait]
impl SyncStrategy for LatestBandsSync {
    type Raw = Value;
    type Item = NewBand;

    fn task_name(&self) -> &str {
        Self::TASK_NAME
    }

    fn partitions(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.months.iter().map(|m| month_key(*m)).collect())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(&self, partition: &str, offset: usize) -> Result<Value, FetchError> {
        let Some(month) = self.month_for(partition) else {
            return Err(FetchError::Malformed {
                url: partition.to_string(),
                reason: "unknown month partition".to_string(),
            });
        };
        let url = self
            .resources
            .endpoints
            .latest_additions(month, offset, self.page_size);
        self.resources
            .fetch_json(&format!("latest {} @{}", partition, offset), &url)
            .await
    }

    fn extract(&self, raw: Value) -> Page<NewBand> {
        let rows = extract_listing_rows(&raw);
        let items = rows
            .iter()
            .filter_map(|row| new_band(&extract_latest_band_summary(row)))
            .collect();
        Page {
            items,
            raw_len: rows.len(),
            total: extract_total_records(&raw),
        }
    }

    /// Drops bands already stored, then fills in missing countries from the
    /// band pages.
    async fn resolve(&self, items: Vec<NewBand>) -> Result<Vec<NewBand>, SyncError> {
        let store = &self.resources.catalog_store;
        let mut resolved = Vec::with_capacity(items.len());
        for mut band in items {
            if store.get_band_by_external_id(band.external_id)?.is_some() {
                debug!("Band {} already known", band.external_id);
                continue;
            }
            if band.country_of_origin.is_empty() {
                match self
                    .resources
                    .fetch_band_country(&band.slug, band.external_id)
                    .await
                {
                    Ok(country) => band.country_of_origin = country,
                    Err(e) => warn!(
                        "No country for band {}, storing without: {}",
                        band.external_id, e
                    ),
                }
            }
            resolved.push(band);
        }
        Ok(resolved)
    }

    async fn persist(
        &self,
        _partition: &str,
        items: Vec<NewBand>,
    ) -> Result<UpsertOutcome, SyncError> {
        Ok(self.resources.catalog_store.upsert_bands(&items)?)
    }

    fn on_exhausted(&self) -> ExhaustionPolicy {
        ExhaustionPolicy::SkipPartition
    }
}
