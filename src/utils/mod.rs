use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref EDGE_NOISE: Regex = Regex::new(r"^[^\p{L}\p{N}]+|[^\p{L}\p{N}.!?)]+$").unwrap();
}

/// Trims edge noise and collapses whitespace in one recognized fragment.
/// Returns `None` when nothing alphanumeric is left.
pub fn clean_fragment(raw: &str) -> Option<String> {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");
    let cleaned = EDGE_NOISE.replace_all(&collapsed, "").trim().to_string();
    if cleaned.chars().any(char::is_alphanumeric) {
        Some(cleaned)
    } else {
        None
    }
}

/// Title-cases a string: the first letter of every alphabetic run is
/// uppercased, the rest lowercased.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if prev_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(ch);
            prev_is_letter = false;
        }
    }
    out
}

/// Converts a 0..1 score into a percentage rounded to one decimal.
pub fn to_percent(score: f32) -> f32 {
    (score * 1000.0).round() / 10.0
}

pub fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}
