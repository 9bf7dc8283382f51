//! Pass reports: what a reconciliation pass saw and what it dispatched.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lmr_core::{ReconError, ReconciledUpdate};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::renumber::FlightConflict;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedUpdate {
    pub launch_id: String,
    pub launch_name: String,
    pub row_index: usize,
    pub payload: String,
    pub raw_date: String,
    pub dispatched: bool,
    pub update: ReconciledUpdate,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub schema_version: &'static str,
    pub manifest_source: String,
    pub manifest_sha256: Option<String>,
    pub manifest_rows: usize,
    pub base_flight_number: Option<u32>,
    pub dry_run: bool,
    pub updates: Vec<AppliedUpdate>,
    pub flight_conflicts: Vec<FlightConflict>,
    pub error: Option<String>,
}

impl PassReport {
    pub fn new(run_id: Uuid, schema_version: &'static str, manifest_source: String, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            schema_version,
            manifest_source,
            manifest_sha256: None,
            manifest_rows: 0,
            base_flight_number: None,
            dry_run,
            updates: Vec::new(),
            flight_conflicts: Vec::new(),
            error: None,
        }
    }
}

/// Result of one pass. An aborted pass keeps every update dispatched before
/// the failure; nothing is rolled back.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    Completed(PassReport),
    Aborted { report: PassReport, error: ReconError },
}

impl PassOutcome {
    pub fn report(&self) -> &PassReport {
        match self {
            Self::Completed(report) | Self::Aborted { report, .. } => report,
        }
    }

    pub fn error(&self) -> Option<&ReconError> {
        match self {
            Self::Completed(_) => None,
            Self::Aborted { error, .. } => Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Write `<dir>/<run_id>/pass_report.json` and return its path.
pub async fn write_pass_report(dir: &Path, report: &PassReport) -> Result<PathBuf> {
    let run_dir = dir.join(report.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;
    let path = run_dir.join("pass_report.json");
    let bytes = serde_json::to_vec_pretty(report).context("serializing pass report")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
