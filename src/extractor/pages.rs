//! HTML detail pages: band page, discography tab, album page.

use super::dates::{extract_release_date, parse_track_duration};
use super::listing::{album_link, cell_text};
use super::{AlbumDetail, AlbumSummary, TrackSummary};
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

lazy_static! {
    static ref DL: Selector = Selector::parse("dl").unwrap();
    static ref DT: Selector = Selector::parse("dt").unwrap();
    static ref DD: Selector = Selector::parse("dd").unwrap();
    static ref ROW: Selector = Selector::parse("tr").unwrap();
    static ref CELL: Selector = Selector::parse("td").unwrap();
    static ref TRACK_ROW: Selector = Selector::parse("table.table_lyrics tr").unwrap();
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `dt`/`dd` pairs of every definition list on the page, keys lowercased
/// without the trailing colon.
fn definition_pairs(document: &Html) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for dl in document.select(&DL) {
        let terms = dl.select(&DT).map(element_text);
        let definitions = dl.select(&DD).map(element_text);
        for (term, definition) in terms.zip(definitions) {
            let key = term.trim_end_matches(':').trim().to_lowercase();
            pairs.push((key, definition));
        }
    }
    pairs
}

fn definition(document: &Html, key: &str) -> Option<String> {
    definition_pairs(document)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty() && v != "N/A")
}

/// Country of origin from a band page; empty when absent.
pub fn extract_band_country(html: &str) -> String {
    let document = Html::parse_document(html);
    definition(&document, "country of origin").unwrap_or_else(|| {
        warn!("Band page has no country of origin");
        String::new()
    })
}

/// Discography row: `[album link, type, year, ...]` as raw cell HTML.
///
/// Split releases are not modeled and yield `None`, as do rows without an
/// album id.
pub fn extract_album_summary(cells: &[String]) -> Option<AlbumSummary> {
    let link = album_link(cells.first().map(String::as_str).unwrap_or(""));
    let release_type = cells.get(1).map(|c| cell_text(c)).unwrap_or_default();

    if release_type.eq_ignore_ascii_case("split") {
        return None;
    }
    let Some(external_id) = link.external_id else {
        warn!("Discography row without an album link: {:?}", cells.first());
        return None;
    };

    let year = cells.get(2).and_then(|c| cell_text(c).parse::<i32>().ok());
    Some(AlbumSummary {
        external_id,
        display_name: link.text,
        release_type,
        year,
    })
}

/// All usable rows of a band's discography tab.
pub fn extract_discography(html: &str) -> Vec<AlbumSummary> {
    let document = Html::parse_document(html);
    document
        .select(&ROW)
        .filter_map(|row| {
            let cells: Vec<String> = row.select(&CELL).map(|td| td.inner_html()).collect();
            if cells.is_empty() {
                // header row
                return None;
            }
            extract_album_summary(&cells)
        })
        .collect()
}

/// Release type, release date and track list from an album page.
pub fn extract_album_detail(html: &str) -> AlbumDetail {
    let document = Html::parse_document(html);

    let release_type = definition(&document, "type").unwrap_or_default();
    let release_date = definition(&document, "release date")
        .as_deref()
        .and_then(extract_release_date);

    let mut tracks = Vec::new();
    for row in document.select(&TRACK_ROW) {
        let cells: Vec<String> = row.select(&CELL).map(element_text).collect();
        if cells.len() < 2 {
            continue;
        }
        let Ok(track_number) = cells[0].trim_end_matches('.').parse::<u32>() else {
            // disc separators and totals rows
            continue;
        };
        let title = cells[1].clone();
        if title.is_empty() {
            warn!("Track {} has no title", track_number);
        }
        tracks.push(TrackSummary {
            track_number,
            title,
            duration_seconds: cells.get(2).and_then(|d| parse_track_duration(d)),
        });
    }

    AlbumDetail {
        release_type,
        release_date,
        tracks,
    }
}
