//! Upstream payloads shaped like the real catalog.

use serde_json::{json, Value};

pub const BASE_URL: &str = "https://upstream.test";

pub const DISCOGRAPHY: &str = r#"
    <table class="display discog"><tbody>
      <tr><td><a href="/albums/Khemmis/Hunted/201">Hunted</a></td><td>Full-length</td><td>2016</td></tr>
      <tr><td><a href="/albums/Khemmis/Split/202">Split with Spirit Adrift</a></td><td>Split</td><td>2017</td></tr>
    </tbody></table>"#;

pub const ALBUM_PAGE: &str = r#"
    <dl><dt>Type:</dt><dd>Full-length</dd><dt>Release date:</dt><dd>October 21st, 2016</dd></dl>
    <table class="table_lyrics"><tbody>
      <tr><td>1.</td><td>Above the Water</td><td>07:42</td></tr>
      <tr><td>2.</td><td>Three Gates</td><td>07:04</td></tr>
      <tr><td>3.</td><td>Candlelight</td><td>06:30</td></tr>
    </tbody></table>"#;

pub fn slug(name: &str) -> String {
    name.replace(' ', "_")
}

/// A listing payload with one row per entry.
pub fn listing(total: usize, rows: Vec<Vec<String>>) -> Value {
    json!({
        "iTotalRecords": total,
        "iTotalDisplayRecords": total,
        "sEcho": 1,
        "aaData": rows,
    })
}

pub fn upcoming_row(
    band_id: i64,
    band: &str,
    album_id: i64,
    album: &str,
    date: &str,
) -> Vec<String> {
    vec![
        format!(
            "<a href='{}/bands/{}/{}'>{}</a>",
            BASE_URL,
            slug(band),
            band_id,
            band
        ),
        format!(
            "<a href='{}/albums/{}/{}/{}'>{}</a>",
            BASE_URL,
            slug(band),
            slug(album),
            album_id,
            album
        ),
        "Full-length".to_string(),
        "Doom Metal".to_string(),
        date.to_string(),
    ]
}

pub fn band_page(country: &str) -> String {
    format!(
        "<html><body><div id='band_stats'><dl><dt>Country of origin:</dt><dd>{}</dd></dl></div></body></html>",
        country
    )
}
