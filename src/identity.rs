//! Identity & clock helpers (C2).
//!
//! Small, pure functions shared by the PGN collaborator (deriving a game's
//! key/title from its own tags) and the sync engine (deriving a chapter's
//! key from its flattened, cached tags) so both sides of the match use the
//! exact same normalisation.

use std::collections::HashMap;

/// Derive a stable game key from `White`/`Black` tags: lowercase,
/// hyphen-joined, `"{white}-vs-{black}"`. Empty if either side is missing
/// or blank — callers treat `""` as "not matchable".
pub fn game_key(tags: &HashMap<String, String>) -> String {
    let white = normalize_name(tags.get("White"));
    let black = normalize_name(tags.get("Black"));
    if white.is_empty() || black.is_empty() {
        return String::new();
    }
    format!("{}-vs-{}", white.to_lowercase(), black.to_lowercase())
}

/// Derive a human-readable title from `White`/`Black` tags:
/// `"{white} vs {black}"`, taking the substring before the first `", "`
/// (drops a "Lastname, Firstname" suffix). Empty if either tag is absent.
pub fn game_title(tags: &HashMap<String, String>) -> String {
    let white = tags.get("White").map(|s| short_name(s));
    let black = tags.get("Black").map(|s| short_name(s));
    match (white, black) {
        (Some(w), Some(b)) if !w.is_empty() && !b.is_empty() => format!("{} vs {}", w, b),
        _ => String::new(),
    }
}

fn short_name(raw: &str) -> String {
    raw.split(", ").next().unwrap_or("").trim().to_string()
}

fn normalize_name(raw: Option<&String>) -> String {
    let raw = match raw {
        Some(r) => r,
        None => return String::new(),
    };
    let stripped = raw.replace(',', "");
    stripped.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Extract the residual-clock annotation from a move comment, e.g.
/// `"[%clk 1:59:58]"` yields `Some("1:59:58")`. Returns `None` if the
/// comment carries no `[%clk ` marker or it is unterminated.
pub fn clock_from_comment(comment: &str) -> Option<String> {
    let start = comment.find("[%clk ")?;
    let after_marker = start + "[%clk ".len();
    let end = comment[after_marker..].find(']')?;
    Some(comment[after_marker..after_marker + end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn key_is_lowercase_hyphenated() {
        let t = tags(&[("White", "Carlsen, M"), ("Black", "Nakamura, H")]);
        assert_eq!(game_key(&t), "carlsen-m-vs-nakamura-h");
    }

    #[test]
    fn key_is_empty_when_a_side_is_missing() {
        let t = tags(&[("White", "Carlsen, M")]);
        assert_eq!(game_key(&t), "");
        assert_eq!(game_key(&HashMap::new()), "");
    }

    #[test]
    fn key_is_empty_when_a_side_is_blank() {
        let t = tags(&[("White", ""), ("Black", "Nakamura, H")]);
        assert_eq!(game_key(&t), "");
    }

    #[test]
    fn key_ignores_order_irrelevant_tags() {
        let mut t1 = tags(&[("White", "Carlsen, M"), ("Black", "Nakamura, H")]);
        t1.insert("Date".to_string(), "2024.01.01".to_string());
        let t2 = tags(&[("White", "Carlsen, M"), ("Black", "Nakamura, H")]);
        assert_eq!(game_key(&t1), game_key(&t2));
    }

    #[test]
    fn key_contains_exactly_one_vs_marker() {
        let t = tags(&[("White", "Carlsen, M"), ("Black", "Nakamura, H")]);
        let key = game_key(&t);
        assert_eq!(key.matches("-vs-").count(), 1);
    }

    #[test]
    fn title_drops_comma_suffix() {
        let t = tags(&[("White", "Carlsen, Magnus"), ("Black", "Nakamura, Hikaru")]);
        assert_eq!(game_title(&t), "Carlsen vs Nakamura");
    }

    #[test]
    fn title_empty_when_tag_missing() {
        let t = tags(&[("White", "Carlsen, Magnus")]);
        assert_eq!(game_title(&t), "");
    }

    #[test]
    fn clock_extracts_trimmed_substring() {
        assert_eq!(clock_from_comment("[%clk 1:59:58]"), Some("1:59:58".to_string()));
        assert_eq!(clock_from_comment("no clock here"), None);
    }

    #[test]
    fn clock_round_trips() {
        let inserted = "1:02:03";
        let comment = format!("some text [%clk {}] more text", inserted);
        assert_eq!(clock_from_comment(&comment).as_deref(), Some(inserted));
    }
}
