//! JSON listing payloads: `{"iTotalRecords": n, "aaData": [[cell, ...], ...]}`
//! where each cell is an HTML fragment.

use super::dates::extract_release_date;
use super::{BandSummary, LinkRef, UpcomingSummary};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::warn;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a").unwrap();
    static ref BAND_HREF: Regex = Regex::new(r"/bands/([^/]+)/(\d+)").unwrap();
    static ref ALBUM_HREF: Regex = Regex::new(r"/albums/[^/]+/([^/]+)/(\d+)").unwrap();
}

/// Total number of records the listing reports, if present.
pub fn extract_total_records(payload: &Value) -> Option<usize> {
    match payload.get("iTotalRecords")? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Rows of a listing payload as lists of raw cell strings. Non-string cells
/// become empty strings; a missing or non-array `aaData` yields no rows.
pub fn extract_listing_rows(payload: &Value) -> Vec<Vec<String>> {
    let Some(rows) = payload.get("aaData").and_then(Value::as_array) else {
        warn!("Listing payload has no aaData array");
        return Vec::new();
    };

    rows.iter()
        .map(|row| match row.as_array() {
            Some(cells) => cells
                .iter()
                .map(|cell| match cell {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => String::new(),
                })
                .collect(),
            None => {
                warn!("Listing row is not an array: {}", row);
                Vec::new()
            }
        })
        .collect()
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub(crate) fn cell_text(cell: &str) -> String {
    let fragment = Html::parse_fragment(cell);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn links_in(cell: &str, pattern: &Regex) -> Vec<LinkRef> {
    let fragment = Html::parse_fragment(cell);
    fragment
        .select(&ANCHOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let caps = pattern.captures(href)?;
            Some(LinkRef {
                external_id: caps[2].parse().ok(),
                slug: caps[1].to_string(),
                text: a.text().collect::<String>().trim().to_string(),
            })
        })
        .collect()
}

pub(crate) fn band_link(cell: &str) -> LinkRef {
    links_in(cell, &BAND_HREF).into_iter().next().unwrap_or_else(|| LinkRef {
        text: cell_text(cell),
        ..Default::default()
    })
}

pub(crate) fn album_link(cell: &str) -> LinkRef {
    links_in(cell, &ALBUM_HREF).into_iter().next().unwrap_or_else(|| LinkRef {
        text: cell_text(cell),
        ..Default::default()
    })
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn band_summary_from(
    link_cell: &str,
    country_cell: &str,
    genre_cell: &str,
    status_cell: &str,
) -> BandSummary {
    let link = band_link(link_cell);
    if link.external_id.is_none() {
        warn!("Band row without a band link: {:?}", link_cell);
    }
    BandSummary {
        external_id: link.external_id,
        slug: link.slug,
        display_name: link.text,
        country_of_origin: cell_text(country_cell),
        raw_genres: cell_text(genre_cell),
        status: cell_text(status_cell),
    }
}

/// Alphabetical listing row: `[band link, country, genre, status]`.
pub fn extract_band_summary(row: &[String]) -> BandSummary {
    band_summary_from(cell(row, 0), cell(row, 1), cell(row, 2), cell(row, 3))
}

/// Latest additions row: `[date added, band link, country, genre, ...]`.
/// The listing carries no status column.
pub fn extract_latest_band_summary(row: &[String]) -> BandSummary {
    band_summary_from(cell(row, 1), cell(row, 2), cell(row, 3), "")
}

/// Upcoming releases row: `[band link(s), album link, type, genre, date]`.
///
/// Rows credited to several bands (splits) and rows without usable ids are
/// skipped.
pub fn extract_upcoming_release(row: &[String]) -> Option<UpcomingSummary> {
    let bands = links_in(cell(row, 0), &BAND_HREF);
    let release_type = cell_text(cell(row, 2));

    if bands.len() > 1 || release_type.eq_ignore_ascii_case("split") {
        return None;
    }
    let Some(band) = bands.into_iter().next().filter(|b| b.external_id.is_some()) else {
        warn!("Upcoming release row without a band link: {:?}", cell(row, 0));
        return None;
    };

    let album = album_link(cell(row, 1));
    let Some(album_external_id) = album.external_id else {
        warn!("Upcoming release row without an album link: {:?}", cell(row, 1));
        return None;
    };

    let raw_genres = cell_text(cell(row, 3));
    Some(UpcomingSummary {
        band: BandSummary {
            external_id: band.external_id,
            slug: band.slug,
            display_name: band.text,
            country_of_origin: String::new(),
            raw_genres: raw_genres.clone(),
            status: String::new(),
        },
        album_external_id,
        album_name: album.text,
        release_type,
        raw_genres,
        release_date: extract_release_date(&cell_text(cell(row, 4))),
    })
}
