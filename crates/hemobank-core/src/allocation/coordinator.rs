//! Reservation coordinator: executes a plan against the store with
//! at-most-once semantics per unit.
//!
//! The per-unit conditional update in the store is the only synchronization
//! primitive; there are no in-process locks. A reservation either covers the
//! whole plan or is fully rolled back; no partial reservation survives.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{AllocationError, AllocationResult};
use crate::db::Database;
use crate::models::AllocationPlan;

/// Receipt for a successful reservation, consumed by `commit` or `release`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    /// Request holding the claim
    pub request_id: String,
    /// Reserved units, in plan order
    pub unit_ids: Vec<String>,
    /// When the claim was taken
    pub reserved_at: DateTime<Utc>,
}

/// Drives the reserve -> commit | release lifecycle for planned units.
pub struct ReservationCoordinator<'a> {
    db: &'a Database,
}

impl<'a> ReservationCoordinator<'a> {
    /// Create a coordinator over the given store.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Reserve every unit in the plan.
    ///
    /// Each unit is claimed by a single conditional update. If any unit is
    /// contested (a concurrent approval already holds it), the units this
    /// attempt did claim are released and `ReservationConflict` is returned;
    /// the caller should re-plan against fresh supply and retry.
    pub fn reserve(&self, plan: &AllocationPlan) -> AllocationResult<Reservation> {
        let now = Utc::now();
        let mut won: Vec<String> = Vec::with_capacity(plan.selections.len());
        let mut contested: Vec<String> = Vec::new();

        for unit_id in plan.unit_ids() {
            match self.db.conditional_reserve(&unit_id, &plan.request_id, now) {
                Ok(true) => won.push(unit_id),
                Ok(false) => contested.push(unit_id),
                Err(e) => {
                    // Store failure mid-batch: roll back what we took
                    self.db.release_units(&won)?;
                    return Err(e.into());
                }
            }
        }

        if !contested.is_empty() {
            warn!(
                request_id = %plan.request_id,
                contested = ?contested,
                "reservation conflict, rolling back"
            );
            self.db.release_units(&won)?;
            return Err(AllocationError::ReservationConflict {
                unit_ids: contested,
            });
        }

        info!(
            request_id = %plan.request_id,
            units = won.len(),
            "reserved plan units"
        );
        Ok(Reservation {
            request_id: plan.request_id.clone(),
            unit_ids: won,
            reserved_at: now,
        })
    }

    /// Commit a reservation: mark every unit handed over and assigned.
    ///
    /// Every unit is attempted even after a failure: units are independent
    /// physical objects and a half-written batch must be reported in full.
    /// Any failure yields `PartialCommit`, logged with both buckets for
    /// manual reconciliation; the caller must not advance the request.
    pub fn commit(&self, reservation: &Reservation) -> AllocationResult<Vec<String>> {
        let now = Utc::now();
        let mut committed: Vec<String> = Vec::with_capacity(reservation.unit_ids.len());
        let mut failed: Vec<String> = Vec::new();

        for unit_id in &reservation.unit_ids {
            match self.db.commit_unit(unit_id, &reservation.request_id, now) {
                Ok(true) => committed.push(unit_id.clone()),
                Ok(false) => failed.push(unit_id.clone()),
                Err(e) => {
                    warn!(unit_id = %unit_id, error = %e, "commit write failed");
                    failed.push(unit_id.clone());
                }
            }
        }

        if !failed.is_empty() {
            error!(
                request_id = %reservation.request_id,
                committed = ?committed,
                failed = ?failed,
                "partial commit, manual reconciliation required"
            );
            return Err(AllocationError::PartialCommit { committed, failed });
        }

        info!(
            request_id = %reservation.request_id,
            units = committed.len(),
            "committed reservation"
        );
        Ok(committed)
    }

    /// Release reserved-but-uncommitted units (cancellation or conflict
    /// rollback). Idempotent: units that are not reserved are untouched.
    /// Returns the number actually released.
    pub fn release(&self, unit_ids: &[String]) -> AllocationResult<usize> {
        let released = self.db.release_units(unit_ids)?;
        debug!(requested = unit_ids.len(), released, "released units");
        Ok(released)
    }

    /// Force-release reservations older than `max_age` that never committed.
    /// Invoked by periodic reconciliation to reclaim abandoned approvals.
    pub fn release_stale(&self, now: DateTime<Utc>, max_age: Duration) -> AllocationResult<usize> {
        let released = self.db.release_stale_reservations(now - max_age)?;
        if released > 0 {
            warn!(released, "reclaimed stale reservations");
        }
        Ok(released)
    }
}
