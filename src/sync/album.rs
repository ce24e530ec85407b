use super::{ExhaustionPolicy, Page, SyncError, SyncResources, SyncStrategy};
use crate::catalog_store::{BandLink, NewAlbum, NewTrack, Shard, UpsertOutcome};
use crate::extractor::{extract_album_detail, extract_discography, AlbumSummary};
use crate::fetch::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

/// Discography sync for the bands of one shard.
///
/// The bands needing a sync are snapshotted when the run starts and split
/// into fixed-size partitions. Each band gets its own retry loop, so one
/// unreachable band never costs the rest of its partition.
pub struct AlbumSync {
    resources: SyncResources,
    task_name: String,
    page_size: usize,
    band_attempts: u32,
    batches: Vec<Vec<BandLink>>,
}

impl AlbumSync {
    pub fn task_name_for(shard: Shard) -> String {
        format!("album_sync_shard_{}", shard.index())
    }

    pub fn new(
        resources: SyncResources,
        shard: Shard,
        page_size: usize,
        band_attempts: u32,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let bands = resources
            .catalog_store
            .get_bands_needing_album_sync(shard, stale_before)?;
        info!(
            "Album sync for shard {}: {} bands need a sync",
            shard,
            bands.len()
        );
        let batches = bands
            .chunks(page_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(Self {
            resources,
            task_name: Self::task_name_for(shard),
            page_size,
            band_attempts: band_attempts.max(1),
            batches,
        })
    }

    /// Page details win over the discography row; a bare year becomes Jan 1.
    fn new_album(
        band: &BandLink,
        summary: &AlbumSummary,
        release_type: String,
        release_date: Option<NaiveDate>,
    ) -> NewAlbum {
        NewAlbum {
            external_id: summary.external_id,
            band_external_id: band.external_id,
            display_name: summary.display_name.clone(),
            release_type: if release_type.is_empty() {
                summary.release_type.clone()
            } else {
                release_type
            },
            release_date: release_date
                .or_else(|| summary.year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))),
        }
    }

    /// One attempt at a band's discography. Albums already stored are not
    /// fetched again.
    async fn sync_band(&self, band: &BandLink) -> Result<UpsertOutcome, SyncError> {
        let store = &self.resources.catalog_store;
        let url = self.resources.endpoints.band_discography(band.external_id);
        let html = self
            .resources
            .fetch_html(&format!("discography {}", band.external_id), &url)
            .await?;
        let albums = extract_discography(&html);

        let mut outcome = UpsertOutcome::default();
        for summary in &albums {
            if store.get_album_id_by_external_id(summary.external_id)?.is_some() {
                outcome.ignored += 1;
                continue;
            }

            let url = self.resources.endpoints.album_page(summary.external_id);
            let html = match self
                .resources
                .fetch_html(&format!("album {}", summary.external_id), &url)
                .await
            {
                Ok(html) => html,
                Err(FetchError::NotFound { .. }) => {
                    warn!(
                        "Album {} of band {} is gone upstream",
                        summary.external_id, band.external_id
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let detail = extract_album_detail(&html);

            let album = Self::new_album(band, summary, detail.release_type, detail.release_date);
            let album_id = store.upsert_album(&album)?;
            let tracks: Vec<NewTrack> = detail
                .tracks
                .into_iter()
                .map(|t| NewTrack {
                    track_number: t.track_number,
                    title: t.title,
                    duration_seconds: t.duration_seconds,
                })
                .collect();
            let new_tracks = store.upsert_tracks(album_id, &tracks)?;
            debug!(
                "Album {} stored with {} new tracks",
                summary.external_id, new_tracks
            );
            outcome.inserted += 1;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl SyncStrategy for AlbumSync {
    type Raw = Vec<BandLink>;
    type Item = BandLink;

    fn task_name(&self) -> &str {
        &self.task_name
    }

    fn partitions(&self) -> anyhow::Result<Vec<String>> {
        Ok((0..self.batches.len()).map(|i| i.to_string()).collect())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    /// A partition is a single page of bands, served from the snapshot.
    async fn fetch_page(&self, partition: &str, offset: usize) -> Result<Vec<BandLink>, FetchError> {
        if offset > 0 {
            return Ok(Vec::new());
        }
        Ok(partition
            .parse::<usize>()
            .ok()
            .and_then(|i| self.batches.get(i))
            .cloned()
            .unwrap_or_default())
    }

    fn extract(&self, raw: Vec<BandLink>) -> Page<BandLink> {
        let len = raw.len();
        Page {
            items: raw,
            raw_len: len,
            total: Some(len),
        }
    }

    async fn resolve(&self, items: Vec<BandLink>) -> Result<Vec<BandLink>, SyncError> {
        Ok(items)
    }

    async fn persist(
        &self,
        partition: &str,
        items: Vec<BandLink>,
    ) -> Result<UpsertOutcome, SyncError> {
        let store = &self.resources.catalog_store;
        let mut outcome = UpsertOutcome::default();

        for band in &items {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.sync_band(band).await {
                    Ok(band_outcome) => {
                        outcome.merge(band_outcome);
                        store.mark_band_synced(band.external_id, Utc::now())?;
                        break;
                    }
                    Err(SyncError::Fetch(FetchError::NotFound { url })) => {
                        info!(
                            "Band {} not found upstream ({}), marking synced",
                            band.external_id, url
                        );
                        store.mark_band_synced(band.external_id, Utc::now())?;
                        break;
                    }
                    Err(SyncError::Fetch(e)) if attempt < self.band_attempts => {
                        warn!(
                            "Band {} attempt {}/{} failed: {}",
                            band.external_id, attempt, self.band_attempts, e
                        );
                    }
                    Err(SyncError::Fetch(e)) => {
                        warn!(
                            "Giving up on band {} in partition {} for this run: {}",
                            band.external_id, partition, e
                        );
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(outcome)
    }

    fn on_exhausted(&self) -> ExhaustionPolicy {
        // band pages come from the store, so fetch_page cannot fail
        ExhaustionPolicy::SkipPartition
    }
}

/// Cutoff for album sync staleness.
pub fn stale_before(now: DateTime<Utc>, stale_days: i64) -> DateTime<Utc> {
    now - Duration::days(stale_days)
}
