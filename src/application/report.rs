//! Run reporting
//!
//! One `UnitReport` per configured (source, unit) pair, aggregated into a
//! `RunReport`. A unit with a transient fetch error but a persisted partial
//! batch counts as an isolated failure, not a run failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::product::SyncOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub source_id: String,
    pub unit_code: String,
    pub pages_fetched: u32,
    pub records_fetched: usize,
    pub records_synced: usize,
    pub items_dropped: u32,
    /// Write counts, present when the unit reached the sync stage.
    pub outcome: Option<SyncOutcome>,
    /// Transient failure that truncated pagination; collected pages were
    /// still synced.
    pub fetch_error: Option<String>,
    /// Failure that prevented the unit from syncing at all.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl UnitReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    pub fn failed_units(&self) -> usize {
        self.units.iter().filter(|u| u.failed()).count()
    }

    pub fn total_written(&self) -> u64 {
        self.units
            .iter()
            .filter_map(|u| u.outcome.as_ref())
            .map(SyncOutcome::written)
            .sum()
    }

    pub fn log_summary(&self) {
        for unit in &self.units {
            match (&unit.error, &unit.outcome) {
                (Some(error), _) => {
                    warn!(source = %unit.source_id, unit = %unit.unit_code, %error,
                        "unit failed");
                }
                (None, Some(outcome)) => {
                    info!(source = %unit.source_id, unit = %unit.unit_code,
                        pages = unit.pages_fetched,
                        fetched = unit.records_fetched,
                        inserted = outcome.inserted,
                        updated = outcome.updated,
                        skipped = outcome.skipped,
                        deleted = outcome.deleted,
                        truncated = unit.fetch_error.is_some(),
                        "unit finished");
                }
                (None, None) => {
                    info!(source = %unit.source_id, unit = %unit.unit_code, "unit empty");
                }
            }
        }
        info!(
            run_id = %self.run_id,
            units = self.units.len(),
            failed = self.failed_units(),
            written = self.total_written(),
            elapsed_ms = (self.finished_at - self.started_at).num_milliseconds(),
            "run finished"
        );
    }
}
