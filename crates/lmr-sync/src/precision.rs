//! Date precision classification for normalized manifest dates.
//!
//! Rules are tried in a fixed order and the first hit decides the precision.
//! Quarter and half-year markers are handled before the layout patterns
//! because they are not month tokens: `Q` is dropped and `H1`/`H2` become
//! quarters 1 and 3, so every one of them resolves to the first month of the
//! period.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use lmr_core::{DatePrecision, NormalizedDate, ReconError};
use regex::{Captures, Regex};

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static TBD: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)tbd|tba"));
static NET: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)net"));

const YEAR: &str = r"^\s*(?P<year>\d{4})\s*";
const MONTH: &str = r"(?P<month>[a-z]{3,9})\s*";
const DAY: &str = r"(?P<day>\d{1,2})\s*";
const HOUR_MINUTE: &str = r"\[?\s*(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*\]?\s*";
const HOUR_MINUTE_SECOND: &str = r"\[?\s*(?P<hour>\d{1,2}):(?P<minute>\d{2}):(?P<second>\d{2})\s*\]?\s*";
const TRAILING_TIME: &str = r"(?:\s+\[?\s*(?P<hour>\d{1,2}):(?P<minute>\d{2})(?::(?P<second>\d{2}))?\s*\]?)?\s*$";

// Quarter and half strings, once the marker has been rewritten to a quarter digit.
// A trailing time is kept in the instant, as for bare years.
static QUARTER_YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(r"^\s*(?P<year>\d{{4}})\s*(?P<quarter>[1-4]){TRAILING_TIME}"))
});
static QUARTER_YEAR_LAST: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(r"^\s*(?P<quarter>[1-4])\s+(?P<year>\d{{4}}){TRAILING_TIME}"))
});

struct DateRule {
    name: &'static str,
    kind: DatePrecision,
    pattern: Regex,
}

impl DateRule {
    fn new(name: &'static str, kind: DatePrecision, parts: &[&str]) -> Self {
        Self {
            name,
            kind,
            pattern: re(&format!("(?i){}$", parts.concat())),
        }
    }
}

// Hours next to a bare year or a month without a day are kept in the instant
// but never raise the precision.
static RULES: LazyLock<Vec<DateRule>> = LazyLock::new(|| {
    use DatePrecision::*;
    vec![
        DateRule::new("year", Year, &[YEAR]),
        DateRule::new("year_hour", Year, &[YEAR, HOUR_MINUTE]),
        DateRule::new("month", Month, &[YEAR, MONTH]),
        DateRule::new("day", Day, &[YEAR, MONTH, DAY]),
        DateRule::new("vague_hour", Month, &[YEAR, MONTH, HOUR_MINUTE]),
        DateRule::new("hour", Hour, &[YEAR, MONTH, DAY, HOUR_MINUTE]),
        DateRule::new("second", Hour, &[YEAR, MONTH, DAY, HOUR_MINUTE_SECOND]),
    ]
});

/// Classify a date cell. `raw` is the cell before normalization and is only
/// consulted for the TBD and NET markers; everything else reads `cleaned`.
pub fn classify(raw: &str, cleaned: &str) -> Result<NormalizedDate, ReconError> {
    let unparseable = || ReconError::UnparseableDate {
        raw: raw.to_string(),
        cleaned: cleaned.to_string(),
    };

    let (kind, instant) = if cleaned.contains('Q') {
        let instant = quarter_start(&cleaned.replacen('Q', "", 1)).ok_or_else(unparseable)?;
        (DatePrecision::Quarter, instant)
    } else if cleaned.contains("H1") {
        let instant = quarter_start(&cleaned.replacen("H1", "1", 1)).ok_or_else(unparseable)?;
        (DatePrecision::Half, instant)
    } else if cleaned.contains("H2") {
        let instant = quarter_start(&cleaned.replacen("H2", "3", 1)).ok_or_else(unparseable)?;
        (DatePrecision::Half, instant)
    } else {
        let (rule, caps) = RULES
            .iter()
            .find_map(|rule| rule.pattern.captures(cleaned).map(|caps| (rule, caps)))
            .ok_or_else(unparseable)?;
        tracing::trace!(rule = rule.name, cleaned, "date rule matched");
        (rule.kind, instant_from(&caps).ok_or_else(unparseable)?)
    };

    Ok(NormalizedDate {
        cleaned: cleaned.to_string(),
        kind,
        instant,
        tbd: TBD.is_match(raw),
        net: NET.is_match(raw),
    })
}

fn quarter_start(s: &str) -> Option<DateTime<Utc>> {
    let caps = QUARTER_YEAR_FIRST
        .captures(s)
        .or_else(|| QUARTER_YEAR_LAST.captures(s))?;
    let year: i32 = caps["year"].parse().ok()?;
    let quarter: u32 = caps["quarter"].parse().ok()?;
    utc(
        year,
        (quarter - 1) * 3 + 1,
        1,
        time_part(&caps, "hour")?,
        time_part(&caps, "minute")?,
        time_part(&caps, "second")?,
    )
}

/// Missing time fields read as zero.
fn time_part(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).map_or(Some(0), |m| m.as_str().parse().ok())
}

fn instant_from(caps: &Captures<'_>) -> Option<DateTime<Utc>> {
    let num = |name: &str| time_part(caps, name);
    let year: i32 = caps["year"].parse().ok()?;
    let month = match caps.name("month") {
        Some(m) => month_number(m.as_str())?,
        None => 1,
    };
    let day = match caps.name("day") {
        Some(d) => d.as_str().parse().ok()?,
        None => 1,
    };
    utc(year, month, day, num("hour")?, num("minute")?, num("second")?)
}

fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, second)
        .map(|dt| dt.and_utc())
}

fn month_number(token: &str) -> Option<u32> {
    let month = match token.to_ascii_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

/// The three renderings of one instant written to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedInstant {
    pub unix: i64,
    pub utc: String,
    pub local: String,
}

pub fn render_instant(instant: DateTime<Utc>, tz: Tz) -> RenderedInstant {
    RenderedInstant {
        unix: instant.timestamp(),
        utc: instant.to_rfc3339_opts(SecondsFormat::Secs, true),
        local: instant.with_timezone(&tz).to_rfc3339_opts(SecondsFormat::Secs, false),
    }
}
