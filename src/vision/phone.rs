//! Mobile number matching
//!
//! Recognizes mainland-China mobile numbers (11 digits, `1[3-9]xxxxxxxxx`)
//! inside OCR text. Matching always runs on normalized text so that OCR output
//! like `138-1234-5678` or `138 1234 5678` is still found.

use regex::Regex;
use std::sync::LazyLock;

/// Digits in a mobile number
pub const NUMBER_LEN: usize = 11;

/// Longest digit run a number may be cut from before it is treated as an
/// excerpt of some longer numeric string (ID numbers, order numbers, ...)
pub const MAX_DIGIT_RUN: usize = 13;

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("valid digit run regex"));
static NUMBER_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^1[3-9][0-9]{9}$").expect("valid number shape regex"));

/// A number found in normalized text.
///
/// `start`/`end` are character (not byte) offsets into the normalized text,
/// `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberMatch {
    pub value: String,
    pub start: usize,
    pub end: usize,
}

/// Strip whitespace, hyphens and full-width spaces.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !(c.is_whitespace() || *c == '-' || *c == '\u{3000}'))
        .collect()
}

/// Whether `text` contains at least one valid number.
pub fn contains(text: &str) -> bool {
    !find_all(text).is_empty()
}

/// Find every valid number in `text`, with offsets into `normalize(text)`.
pub fn find_all(text: &str) -> Vec<NumberMatch> {
    if text.is_empty() {
        return Vec::new();
    }
    find_all_normalized(&normalize(text))
}

/// Same as [`find_all`] for text that is already normalized.
pub fn find_all_normalized(normalized: &str) -> Vec<NumberMatch> {
    DIGIT_RUN
        .find_iter(normalized)
        .filter(|run| is_isolated_number(run.as_str()))
        .map(|run| {
            let start = normalized[..run.start()].chars().count();
            NumberMatch {
                value: run.as_str().to_string(),
                start,
                end: start + NUMBER_LEN,
            }
        })
        .collect()
}

/// A maximal digit run qualifies only if it is exactly one number: any digit
/// touching it on either side means it was cut from a longer string.
fn is_isolated_number(run: &str) -> bool {
    if run.len() > MAX_DIGIT_RUN {
        return false;
    }
    run.len() == NUMBER_LEN && NUMBER_SHAPE.is_match(run)
}
