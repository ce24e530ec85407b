use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

lazy_static! {
    static ref ORDINAL_SUFFIX: Regex = Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").unwrap();
    static ref YEAR_ONLY: Regex = Regex::new(r"^(\d{4})$").unwrap();
    static ref MONTH_YEAR: Regex = Regex::new(r"^([A-Za-z]+)\.?\s+(\d{4})$").unwrap();
    static ref MONTH_DAY_YEAR: Regex =
        Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2}),?\s+(\d{4})$").unwrap();
    static ref ISO_DATE: Regex = Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap();
}

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Month number for a full or truncated English month name ("Augu" is
/// August). At least three letters are required so "Ma" stays ambiguous.
fn month_from_name(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(&name))
        .map(|i| i as u32 + 1)
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let cleaned = ORDINAL_SUFFIX.replace_all(text.trim(), "$1");
    let cleaned = cleaned.trim();

    if let Some(caps) = YEAR_ONLY.captures(cleaned) {
        return NaiveDate::from_ymd_opt(caps[1].parse().ok()?, 1, 1);
    }
    if let Some(caps) = ISO_DATE.captures(cleaned) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }
    if let Some(caps) = MONTH_YEAR.captures(cleaned) {
        let month = month_from_name(&caps[1])?;
        return NaiveDate::from_ymd_opt(caps[2].parse().ok()?, month, 1);
    }
    if let Some(caps) = MONTH_DAY_YEAR.captures(cleaned) {
        let month = month_from_name(&caps[1])?;
        return NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?);
    }
    None
}

/// Parse an upstream release date.
///
/// Accepts `"2023"` (January 1st), `"March 2023"` (the 1st of the month) and
/// `"January 2nd, 1996"`. Anything else is logged and yields `None`.
pub fn extract_release_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = parse_date_text(trimmed);
    if parsed.is_none() {
        warn!("Unparseable release date: {:?}", trimmed);
    }
    parsed
}

/// `"04:23"` is 263 seconds, `"1:02:03"` is 3723.
pub fn parse_track_duration(text: &str) -> Option<u32> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let mut total: u32 = 0;
    for (i, part) in parts.iter().enumerate() {
        let value: u32 = part.trim().parse().ok()?;
        if i > 0 && value >= 60 {
            return None;
        }
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}
