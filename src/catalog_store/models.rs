//! Catalog records as stored in SQLite, plus the insert payloads the sync
//! orchestrators build from extracted data.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Stored records
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandRecord {
    pub id: i64,
    pub external_id: i64,
    pub slug: String,
    pub display_name: String,
    pub country_of_origin: String,
    /// Normalized tags in first-occurrence order.
    pub genre_tags: Vec<String>,
    pub lifecycle_status: String,
    pub follower_count: i64,
    /// Last time the band's discography was synced. `None` until album sync
    /// visits the band.
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub id: i64,
    pub external_id: i64,
    pub band_id: i64,
    pub display_name: String,
    pub release_type: String,
    pub release_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: i64,
    pub album_id: i64,
    pub title: String,
    pub track_number: u32,
    pub duration_seconds: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpcomingReleaseRecord {
    pub id: i64,
    pub album_external_id: i64,
    pub band_id: i64,
    pub band_name: String,
    pub album_name: String,
    pub release_type: String,
    pub release_date: Option<NaiveDate>,
    /// Genre tags of the band at capture time.
    pub genre_tags: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

/// Minimal reference to a band, enough to build its upstream URLs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandLink {
    pub external_id: i64,
    pub slug: String,
    pub display_name: String,
}

// =============================================================================
// Insert payloads
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct NewBand {
    pub external_id: i64,
    pub slug: String,
    pub display_name: String,
    pub country_of_origin: String,
    pub genre_tags: Vec<String>,
    pub lifecycle_status: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewAlbum {
    pub external_id: i64,
    pub band_external_id: i64,
    pub display_name: String,
    pub release_type: String,
    pub release_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTrack {
    pub track_number: u32,
    pub title: String,
    pub duration_seconds: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewUpcomingRelease {
    pub album_external_id: i64,
    pub band_external_id: i64,
    pub album_name: String,
    pub release_type: String,
    pub release_date: Option<NaiveDate>,
    pub genre_tags: Vec<String>,
}

/// Result of a batch insert-or-ignore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Rows that already existed and were left untouched.
    pub ignored: usize,
}

impl UpsertOutcome {
    pub fn merge(&mut self, other: UpsertOutcome) {
        self.inserted += other.inserted;
        self.ignored += other.ignored;
    }
}

/// A horizontal slice of the band table, selected by
/// `external_id % count == index`.
///
/// Album sync runs one job per shard so that a full discography sweep can be
/// split over several schedule slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Shard {
    index: u32,
    count: u32,
}

impl Shard {
    /// The whole table.
    pub const ALL: Shard = Shard { index: 0, count: 1 };

    pub fn new(index: u32, count: u32) -> Result<Self> {
        if count == 0 {
            bail!("Shard count must be at least 1");
        }
        if index >= count {
            bail!("Shard index {} out of range for {} shards", index, count);
        }
        Ok(Self { index, count })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn contains(&self, external_id: i64) -> bool {
        external_id.rem_euclid(self.count as i64) == self.index as i64
    }
}

impl std::fmt::Display for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}
