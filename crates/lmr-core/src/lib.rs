//! Core domain model and error taxonomy for the launch manifest reconciler.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "lmr-core";

/// Authoritative launch record owned by the catalog store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogLaunch {
    pub id: String,
    pub name: String,
    pub flight_number: u32,
    pub upcoming: bool,
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
}

fn default_auto_update() -> bool {
    true
}

impl CatalogLaunch {
    /// Only upcoming launches that have not opted out of automatic updates are reconciled.
    pub fn is_reconcilable(&self) -> bool {
        self.upcoming && self.auto_update
    }
}

/// Launch site record as returned by the catalog store's site lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchpadRecord {
    pub id: String,
    pub name: String,
    pub timezone: String,
}

/// One upcoming-launch entry decoded from the external manifest table.
///
/// `raw_date` is the untouched cell text; `payload` and `site` already have
/// footnote markers removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub index: usize,
    pub raw_date: String,
    pub payload: String,
    pub site: String,
}

/// Declared granularity of a manifest date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    Quarter,
    Half,
    Year,
    Month,
    Day,
    Hour,
}

impl DatePrecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quarter => "quarter",
            Self::Half => "half",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
        }
    }
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a manifest date cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedDate {
    pub cleaned: String,
    pub kind: DatePrecision,
    pub instant: DateTime<Utc>,
    pub tbd: bool,
    pub net: bool,
}

/// Partial update applied to a matched catalog launch. Field names are the
/// catalog store's wire names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledUpdate {
    pub flight_number: u32,
    pub date_unix: i64,
    pub date_utc: String,
    pub date_local: String,
    pub date_precision: DatePrecision,
    pub launchpad: String,
    pub tbd: bool,
    pub net: bool,
}

/// Reasons a reconciliation pass aborts. Every variant carries the text that
/// triggered it so the log line alone is enough to fix the upstream cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconError {
    #[error("no date pattern matches {cleaned:?} (raw cell {raw:?})")]
    UnparseableDate { raw: String, cleaned: String },
    #[error("no launchpad pattern matches {raw:?}")]
    UnresolvedLaunchpad { raw: String },
    #[error("catalog store has no launchpad named {canonical:?}")]
    SiteLookupMiss { canonical: String },
    #[error("launchpad {launchpad} has unknown timezone {timezone:?}")]
    UnknownTimezone { launchpad: String, timezone: String },
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),
    #[error("manifest layout drift: {0}")]
    ManifestLayout(String),
    #[error("flight number {flight_number} assigned to both {first:?} and {second:?}")]
    MatchAmbiguity {
        flight_number: u32,
        first: String,
        second: String,
    },
    #[error("patch of launch {launch_id} failed: {message}")]
    Dispatch { launch_id: String, message: String },
}

impl ReconError {
    /// Stable short code used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnparseableDate { .. } => "unparseable_date",
            Self::UnresolvedLaunchpad { .. } => "unresolved_launchpad",
            Self::SiteLookupMiss { .. } => "site_lookup_miss",
            Self::UnknownTimezone { .. } => "unknown_timezone",
            Self::UpstreamFetch(_) => "upstream_fetch",
            Self::ManifestLayout(_) => "manifest_layout",
            Self::MatchAmbiguity { .. } => "match_ambiguity",
            Self::Dispatch { .. } => "dispatch",
        }
    }
}
