use super::{new_band, ExhaustionPolicy, Page, SyncError, SyncResources, SyncStrategy};
use crate::catalog_store::{NewUpcomingRelease, UpsertOutcome};
use crate::extractor::{
    extract_listing_rows, extract_total_records, extract_upcoming_release, UpcomingSummary,
};
use crate::fetch::FetchError;
use crate::genres::normalize_genres;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

const PARTITION: &str = "upcoming";

/// Captures the upcoming releases listing, creating unknown bands on the way.
pub struct UpcomingReleasesSync {
    resources: SyncResources,
    page_size: usize,
}

impl UpcomingReleasesSync {
    pub const TASK_NAME: &'static str = "upcoming_releases_sync";

    pub fn new(resources: SyncResources, page_size: usize) -> Self {
        Self {
            resources,
            page_size,
        }
    }

    /// Make sure the release's band is stored. `Ok(false)` when the band
    /// could not be created.
    async fn ensure_band(&self, release: &UpcomingSummary) -> Result<bool, SyncError> {
        let store = &self.resources.catalog_store;
        let Some(external_id) = release.band.external_id else {
            return Ok(false);
        };
        if store.get_band_by_external_id(external_id)?.is_some() {
            return Ok(true);
        }

        let country = match self
            .resources
            .fetch_band_country(&release.band.slug, external_id)
            .await
        {
            Ok(country) => country,
            Err(e) => {
                warn!(
                    "Cannot create band {} for upcoming album {}: {}",
                    external_id, release.album_external_id, e
                );
                return Ok(false);
            }
        };

        let mut summary = release.band.clone();
        summary.country_of_origin = country;
        let Some(band) = new_band(&summary) else {
            return Ok(false);
        };
        store.upsert_bands(std::slice::from_ref(&band))?;
        debug!("Created band {} from upcoming releases", external_id);
        Ok(true)
    }
}

#[async_trait]
impl SyncStrategy for UpcomingReleasesSync {
    type Raw = Value;
    type Item = UpcomingSummary;

    fn task_name(&self) -> &str {
        Self::TASK_NAME
    }

    fn partitions(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![PARTITION.to_string()])
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(&self, _partition: &str, offset: usize) -> Result<Value, FetchError> {
        let url = self
            .resources
            .endpoints
            .upcoming_releases(offset, self.page_size);
        self.resources
            .fetch_json(&format!("upcoming @{}", offset), &url)
            .await
    }

    fn extract(&self, raw: Value) -> Page<UpcomingSummary> {
        let rows = extract_listing_rows(&raw);
        let items = rows
            .iter()
            .filter_map(|row| extract_upcoming_release(row))
            .collect();
        Page {
            items,
            raw_len: rows.len(),
            total: extract_total_records(&raw),
        }
    }

    /// Keeps only releases whose band is stored, creating bands as needed.
    async fn resolve(&self, items: Vec<UpcomingSummary>) -> Result<Vec<UpcomingSummary>, SyncError> {
        let mut resolved = Vec::with_capacity(items.len());
        for release in items {
            if self.ensure_band(&release).await? {
                resolved.push(release);
            } else {
                warn!(
                    "Dropping upcoming album {} for this run",
                    release.album_external_id
                );
            }
        }
        Ok(resolved)
    }

    async fn persist(
        &self,
        _partition: &str,
        items: Vec<UpcomingSummary>,
    ) -> Result<UpsertOutcome, SyncError> {
        let store = &self.resources.catalog_store;
        let mut outcome = UpsertOutcome::default();
        for release in items {
            let Some(band_external_id) = release.band.external_id else {
                continue;
            };
            let record = NewUpcomingRelease {
                album_external_id: release.album_external_id,
                band_external_id,
                album_name: release.album_name,
                release_type: release.release_type,
                release_date: release.release_date,
                genre_tags: normalize_genres(&release.raw_genres),
            };
            if store.upsert_upcoming_release(&record)? {
                outcome.inserted += 1;
            } else {
                outcome.ignored += 1;
            }
        }
        Ok(outcome)
    }

    fn on_exhausted(&self) -> ExhaustionPolicy {
        ExhaustionPolicy::AbortRun
    }
}
