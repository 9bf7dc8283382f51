//! Fuzzy matching of catalog launch names against manifest payload text.

use regex::Regex;
use strsim::normalized_levenshtein;

/// Catalog names from a high-cadence series whose instances differ only by
/// their group number (`Starlink 2` is a substring of `Starlink 23`), so a
/// substring hit alone cannot tell them apart.
pub const DEFAULT_SERIES_PATTERN: &str = r"(?i)starlink";

/// Lowercase, map every non-alphanumeric character to a space, collapse runs.
pub fn process(s: &str) -> String {
    let mut folded = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            folded.extend(c.to_lowercase());
        } else {
            folded.push(' ');
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn to_score(similarity: f64) -> u8 {
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Whole-string similarity, 0-100.
pub fn ratio(a: &str, b: &str) -> u8 {
    let (a, b) = (process(a), process(b));
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    to_score(normalized_levenshtein(&a, &b))
}

/// Best similarity of the shorter string against any same-length window of
/// the longer one, 0-100. A substring scores 100.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let (a, b) = (process(a), process(b));
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.is_empty() {
        return 0;
    }
    if long.contains(&short) {
        return 100;
    }

    let width = short.chars().count();
    let long_chars: Vec<char> = long.chars().collect();
    let best = long_chars
        .windows(width)
        .map(|window| normalized_levenshtein(&short, &window.iter().collect::<String>()))
        .fold(0.0_f64, f64::max);
    to_score(best)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchScore {
    pub partial: u8,
    pub full: u8,
    pub numbered_series: bool,
}

impl MatchScore {
    pub fn accepted(&self) -> bool {
        self.partial == 100 && (!self.numbered_series || self.full == 100)
    }
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    series: Regex,
}

impl FuzzyMatcher {
    pub fn new(series_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            series: Regex::new(series_pattern)?,
        })
    }

    pub fn is_numbered_series(&self, catalog_name: &str) -> bool {
        self.series.is_match(catalog_name)
    }

    pub fn score(&self, catalog_name: &str, payload: &str) -> MatchScore {
        MatchScore {
            partial: partial_ratio(catalog_name, payload),
            full: ratio(catalog_name, payload),
            numbered_series: self.is_numbered_series(catalog_name),
        }
    }

    pub fn accepts(&self, catalog_name: &str, payload: &str) -> bool {
        self.score(catalog_name, payload).accepted()
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_PATTERN).expect("default series pattern compiles")
    }
}
