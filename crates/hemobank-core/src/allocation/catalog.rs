//! Read-only inventory catalog view.

use chrono::{DateTime, Utc};

use crate::compat::{donor_type_keys, DonorMatch};
use crate::db::{Database, DbResult};
use crate::models::BloodUnit;

/// Read-only view over the unit store, filtered to stock that may be
/// allocated right now for a set of compatible donor types.
pub struct InventoryCatalog<'a> {
    db: &'a Database,
}

impl<'a> InventoryCatalog<'a> {
    /// Create a catalog view over the given store.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Units eligible for allocation to any of the given donor types,
    /// ordered earliest-expiring first (use the oldest stock first), ties
    /// broken by unit ID for determinism.
    ///
    /// Excludes reserved and assigned units, and anything expired as of
    /// `now`, even when a lagging disposal sweep has not yet rewritten the
    /// stored status.
    pub fn available_units(
        &self,
        donors: &[DonorMatch],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<BloodUnit>> {
        let mut units = self
            .db
            .query_available_units(&donor_type_keys(donors), now)?;
        // The query already filters on expiry; recheck in case the snapshot
        // is older than the clock by the time it is used.
        units.retain(|u| u.is_allocatable_as_of(now));
        Ok(units)
    }
}
