//! Cleanup of hand-edited manifest cells.

use std::sync::LazyLock;

use regex::Regex;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

// Footnote runs glued to a bracketed time, balanced or not: "[14:10][3]", "[14:10][3", "[14:10]3]".
static TIME_FOOTNOTES: LazyLock<Regex> =
    LazyLock::new(|| re(r"(\[\d{2}:\d{2}\])(?:\[\d{1,3}\]|\[\d{1,3}|\d{1,3}\])+"));
// Unbalanced footnote directly after a month name: "2022 Mar3]".
static MONTH_FOOTNOTES: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)(\d{4}\s*[a-z]{3,9}\s*)(?:\d{1,3}\])+"));
static BRACKET_FOOTNOTES: LazyLock<Regex> = LazyLock::new(|| re(r"\[{1,2}\d{1,3}\]"));
static BRACKETS: LazyLock<Regex> = LazyLock::new(|| re(r"[~\[\]]"));
static QUALIFIERS: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)early|mid|late|end|tbd|tba|net"));
static UTC_OFFSET: LazyLock<Regex> = LazyLock::new(|| re(r"-\d{2}:\d{2}"));
static UNCERTAINTY: LazyLock<Regex> = LazyLock::new(|| re(r"[()?]"));
static FOOTNOTE: LazyLock<Regex> = LazyLock::new(|| re(r"\[\d{1,3}\]"));

/// Normalize a raw date cell down to the tokens the precision classifier reads.
///
/// Only the first of several `/`-separated alternatives is kept. The result is a
/// fixed point: normalizing it again returns it unchanged.
pub fn normalize_date_cell(raw: &str) -> String {
    let s = TIME_FOOTNOTES.replace_all(raw, "$1");
    let s = MONTH_FOOTNOTES.replace_all(&s, "$1");
    let s = BRACKET_FOOTNOTES.replace_all(&s, "");
    let s = BRACKETS.replace_all(&s, "");
    let s = QUALIFIERS.replace_all(&s, " ");
    let s = UTC_OFFSET.replace_all(&s, " ");
    let s = UNCERTAINTY.replace_all(&s, " ");
    let first = s.split('/').next().unwrap_or_default();
    collapse_whitespace(first)
}

/// Drop `[n]` footnote markers from payload and site cells.
pub fn strip_footnotes(cell: &str) -> String {
    collapse_whitespace(&FOOTNOTE.replace_all(cell, ""))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
