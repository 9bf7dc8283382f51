//! Flight numbers follow manifest row order, starting from the last completed launch.

use std::collections::BTreeMap;

use lmr_core::{CatalogLaunch, ReconError};
use serde::Serialize;
use tracing::warn;

use crate::matcher::ratio;

/// `completed` must be sorted by flight number ascending. When the newest
/// completed launch is still the first manifest row, that row keeps its number.
pub fn base_flight_number(completed: &[CatalogLaunch], first_payload: Option<&str>) -> u32 {
    let Some(last) = completed.last() else {
        return 1;
    };
    match first_payload {
        Some(payload) if ratio(&last.name, payload) == 100 => last.flight_number,
        _ => last.flight_number + 1,
    }
}

pub fn assigned_flight_number(base: u32, row_index: usize) -> u32 {
    base + row_index as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightConflict {
    pub flight_number: u32,
    pub first_launch: String,
    pub second_launch: String,
}

/// Flight numbers handed out during one pass, keyed to the launch that got them.
#[derive(Debug, Default)]
pub struct FlightLedger {
    enforce_unique: bool,
    assigned: BTreeMap<u32, String>,
    conflicts: Vec<FlightConflict>,
}

impl FlightLedger {
    pub fn new(enforce_unique: bool) -> Self {
        Self {
            enforce_unique,
            ..Self::default()
        }
    }

    /// Record `flight_number` for `launch`. A number already held by another
    /// launch is a conflict: an error when uniqueness is enforced, otherwise
    /// kept for the report.
    pub fn record(&mut self, flight_number: u32, launch: &CatalogLaunch) -> Result<(), ReconError> {
        match self.assigned.get(&flight_number) {
            Some(holder) if *holder != launch.id => {
                let conflict = FlightConflict {
                    flight_number,
                    first_launch: holder.clone(),
                    second_launch: launch.id.clone(),
                };
                if self.enforce_unique {
                    return Err(ReconError::MatchAmbiguity {
                        flight_number,
                        first: conflict.first_launch,
                        second: conflict.second_launch,
                    });
                }
                warn!(flight_number, first = %conflict.first_launch, second = %conflict.second_launch, "duplicate flight number");
                self.conflicts.push(conflict);
            }
            Some(_) => {}
            None => {
                self.assigned.insert(flight_number, launch.id.clone());
            }
        }
        Ok(())
    }

    pub fn conflicts(&self) -> &[FlightConflict] {
        &self.conflicts
    }
}
