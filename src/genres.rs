//! Canonicalization of free-text genre strings into tag lists.
//!
//! Downstream filtering intersects tag sets, so the output spelling must be
//! stable: the same raw string always yields the same tags, and feeding the
//! output back in (joined with `/`) yields it unchanged.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PARENTHETICAL: Regex = Regex::new(r"\([^)]*\)").unwrap();
    static ref METAL_WORD: Regex = Regex::new(r"(?i)\bmetal\b").unwrap();
    static ref UNION_WORD: Regex = Regex::new(r"(?i)\b(and|with)\b").unwrap();
    static ref QUALIFIER_WORD: Regex = Regex::new(r"(?i)\b(influences|elements)\b").unwrap();
    static ref GARDE_WORD: Regex = Regex::new(r"\bgarde\b").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalize a raw genre string into ordered, de-duplicated tags.
///
/// `"Black/Death Metal"` becomes `["Black", "Death"]`,
/// `"Avant-garde Metal (early), Doom Metal with Folk influences"` becomes
/// `["Avant Garde", "Doom", "Folk"]`.
pub fn normalize_genres(raw: &str) -> Vec<String> {
    let text = PARENTHETICAL.replace_all(raw, "");
    let text = text.replace('-', " ");
    let text = METAL_WORD.replace_all(&text, "");
    let text = UNION_WORD.replace_all(&text, "/");
    let text = QUALIFIER_WORD.replace_all(&text, "");
    let text = GARDE_WORD.replace_all(&text, "Garde");
    let text = WHITESPACE.replace_all(&text, " ");

    let mut tags: Vec<String> = Vec::new();
    for segment in text.split(['/', ';', ',']) {
        let tag = segment.trim();
        if tag.is_empty() || tags.iter().any(|t| t == tag) {
            continue;
        }
        tags.push(tag.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_idempotent(raw: &str) {
        let once = normalize_genres(raw);
        let twice = normalize_genres(&once.join("/"));
        assert_eq!(once, twice, "not idempotent for {:?}", raw);
    }

    #[test]
    fn splits_slash_separated_genres() {
        assert_eq!(normalize_genres("Black/Death Metal"), vec!["Black", "Death"]);
    }

    #[test]
    fn strips_parenthetical_qualifiers() {
        assert_eq!(
            normalize_genres("Thrash Metal (early); Groove Metal (later)"),
            vec!["Thrash", "Groove"]
        );
    }

    #[test]
    fn metal_is_removed_only_as_a_whole_word() {
        assert_eq!(normalize_genres("Metalcore"), vec!["Metalcore"]);
        assert_eq!(normalize_genres("Heavy METAL"), vec!["Heavy"]);
    }

    #[test]
    fn and_with_become_union_markers() {
        assert_eq!(
            normalize_genres("Doom Metal with Folk influences"),
            vec!["Doom", "Folk"]
        );
        assert_eq!(
            normalize_genres("Black and Thrash Metal"),
            vec!["Black", "Thrash"]
        );
        // "and" inside a word is untouched
        assert_eq!(normalize_genres("Sandcore"), vec!["Sandcore"]);
    }

    #[test]
    fn avant_garde_family_is_normalized() {
        assert_eq!(
            normalize_genres("Avant-garde Black Metal"),
            vec!["Avant Garde Black"]
        );
        assert_eq!(normalize_genres("Avant-Garde Metal"), vec!["Avant Garde"]);
    }

    #[test]
    fn deduplicates_keeping_first_occurrence() {
        assert_eq!(
            normalize_genres("Death Metal, Black Metal, Death Metal/Grindcore"),
            vec!["Death", "Black", "Grindcore"]
        );
    }

    #[test]
    fn empty_and_noise_inputs() {
        assert!(normalize_genres("").is_empty());
        assert!(normalize_genres("Metal").is_empty());
        assert!(normalize_genres(" / ; , ").is_empty());
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(
            normalize_genres("Progressive    Death\tMetal"),
            vec!["Progressive Death"]
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "Black/Death Metal",
            "Avant-garde Metal (early), Doom Metal with Folk influences",
            "Melodic Death Metal; Metalcore",
            "Symphonic Black Metal with Industrial elements",
            "Heavy/Power Metal and Hard Rock",
            "Drone, Noise",
        ] {
            assert_idempotent(raw);
        }
    }
}
