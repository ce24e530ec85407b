//! Best-effort extraction of typed records from upstream listings and pages.
//!
//! Nothing in here fails: a malformed field degrades to an empty value and a
//! `warn!`, a row that cannot be used at all yields `None`. One bad row must
//! never cost the rest of the page.

mod dates;
mod listing;
mod pages;

pub use dates::{extract_release_date, parse_track_duration};
pub use listing::{
    extract_band_summary, extract_latest_band_summary, extract_listing_rows,
    extract_total_records, extract_upcoming_release,
};
pub use pages::{
    extract_album_detail, extract_album_summary, extract_band_country, extract_discography,
};

use chrono::NaiveDate;
use serde::Serialize;

/// A band as it appears in a listing row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BandSummary {
    pub external_id: Option<i64>,
    pub slug: String,
    pub display_name: String,
    pub country_of_origin: String,
    /// Genre text exactly as listed, before normalization.
    pub raw_genres: String,
    pub status: String,
}

/// An album row from a band's discography.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AlbumSummary {
    pub external_id: i64,
    pub display_name: String,
    pub release_type: String,
    pub year: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub track_number: u32,
    pub title: String,
    pub duration_seconds: Option<u32>,
}

/// Fields only available on an album's own page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlbumDetail {
    pub release_type: String,
    pub release_date: Option<NaiveDate>,
    pub tracks: Vec<TrackSummary>,
}

/// A row of the upcoming releases listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpcomingSummary {
    pub band: BandSummary,
    pub album_external_id: i64,
    pub album_name: String,
    pub release_type: String,
    pub raw_genres: String,
    pub release_date: Option<NaiveDate>,
}

/// Link target parsed out of an anchor cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct LinkRef {
    pub external_id: Option<i64>,
    pub slug: String,
    pub text: String,
}
