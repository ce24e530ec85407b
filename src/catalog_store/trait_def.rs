//! CatalogStore trait definition.

use super::models::*;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

/// Persistence interface consumed by the sync orchestrators.
///
/// Every write is idempotent from the caller's point of view: re-inserting a
/// known external id is reported as ignored, never as an error, and never
/// overwrites the stored row.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Bands
    // =========================================================================

    /// Resolve a band by its upstream id.
    fn get_band_by_external_id(&self, external_id: i64) -> Result<Option<BandRecord>>;

    /// Insert bands, ignoring any whose external id is already stored.
    fn upsert_bands(&self, bands: &[NewBand]) -> Result<UpsertOutcome>;

    fn get_all_band_external_links(&self) -> Result<Vec<BandLink>>;

    /// Bands of `shard` never synced, or last synced before `stale_before`,
    /// ordered by external id.
    fn get_bands_needing_album_sync(
        &self,
        shard: Shard,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<BandLink>>;

    fn mark_band_synced(&self, external_id: i64, at: DateTime<Utc>) -> Result<()>;

    // =========================================================================
    // Albums and tracks
    // =========================================================================

    fn get_album_id_by_external_id(&self, external_id: i64) -> Result<Option<i64>>;

    /// Insert an album and return its id, or return the id of the already
    /// stored album. Fails if the referenced band does not exist.
    fn upsert_album(&self, album: &NewAlbum) -> Result<i64>;

    /// Insert tracks for an album, returning how many were new.
    fn upsert_tracks(&self, album_id: i64, tracks: &[NewTrack]) -> Result<usize>;

    fn get_album_tracks(&self, album_id: i64) -> Result<Vec<TrackRecord>>;

    // =========================================================================
    // Upcoming releases
    // =========================================================================

    /// Insert an upcoming release keyed by album external id. Returns false
    /// when the album was already captured. Fails if the band does not exist.
    fn upsert_upcoming_release(&self, release: &NewUpcomingRelease) -> Result<bool>;

    fn get_upcoming_releases_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UpcomingReleaseRecord>>;

    // =========================================================================
    // Counts (for metrics)
    // =========================================================================

    fn get_bands_count(&self) -> usize;
    fn get_albums_count(&self) -> usize;
    fn get_tracks_count(&self) -> usize;
    fn get_upcoming_count(&self) -> usize;
}
