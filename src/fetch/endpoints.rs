//! Upstream URL layout.

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone)]
pub struct CatalogEndpoints {
    base_url: String,
}

impl CatalogEndpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn paging(offset: usize, length: usize) -> String {
        format!(
            "sEcho=1&iDisplayStart={}&iDisplayLength={}",
            offset, length
        )
    }

    /// Alphabetical band listing for one letter partition (`A`..`Z`, `NBR`, `~`).
    pub fn letter_listing(&self, letter: &str, offset: usize, length: usize) -> String {
        format!(
            "{}/browse/ajax-letter/l/{}/json/1?{}",
            self.base_url,
            urlencoding::encode(letter),
            Self::paging(offset, length)
        )
    }

    /// Bands added during the month containing `month`.
    pub fn latest_additions(&self, month: NaiveDate, offset: usize, length: usize) -> String {
        format!(
            "{}/archives/ajax-band-list/selection/{:04}-{:02}/by/created/json/1?{}",
            self.base_url,
            month.year(),
            month.month(),
            Self::paging(offset, length)
        )
    }

    pub fn upcoming_releases(&self, offset: usize, length: usize) -> String {
        format!(
            "{}/release/ajax-upcoming/json/1?{}",
            self.base_url,
            Self::paging(offset, length)
        )
    }

    pub fn band_discography(&self, band_external_id: i64) -> String {
        format!(
            "{}/band/discography/id/{}/tab/all",
            self.base_url, band_external_id
        )
    }

    pub fn band_page(&self, slug: &str, band_external_id: i64) -> String {
        format!(
            "{}/bands/{}/{}",
            self.base_url,
            urlencoding::encode(slug),
            band_external_id
        )
    }

    pub fn album_page(&self, album_external_id: i64) -> String {
        format!("{}/albums/_/_/{}", self.base_url, album_external_id)
    }
}
