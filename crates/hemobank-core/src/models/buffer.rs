//! Emergency buffer pool snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::unit::{BloodType, BloodUnit, RhFactor};

/// Read-only snapshot of the emergency reserve pool.
///
/// Buffer membership does not change transfusion eligibility; it only pushes
/// a unit to the back of the allocation order and raises an operator-visible
/// warning when one is used. Lookups by unit ID and by serial number are O(1).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferPool {
    /// Unit count per (type, Rh)
    counts: HashMap<String, u32>,
    /// unit_id -> serial_number
    by_id: HashMap<String, String>,
    /// serial_number -> unit_id
    by_serial: HashMap<String, String>,
}

impl BufferPool {
    /// Build a snapshot from the units currently flagged as buffer stock.
    pub fn from_units(units: &[BloodUnit]) -> Self {
        let mut pool = Self::default();
        for unit in units {
            *pool.counts.entry(unit.type_label()).or_insert(0) += 1;
            pool.by_id
                .insert(unit.unit_id.clone(), unit.serial_number.clone());
            pool.by_serial
                .insert(unit.serial_number.clone(), unit.unit_id.clone());
        }
        pool
    }

    /// Membership test by unit ID.
    pub fn contains_id(&self, unit_id: &str) -> bool {
        self.by_id.contains_key(unit_id)
    }

    /// Membership test by serial number.
    pub fn contains_serial(&self, serial_number: &str) -> bool {
        self.by_serial.contains_key(serial_number)
    }

    /// Whether the given unit belongs to the emergency reserve.
    pub fn contains_unit(&self, unit: &BloodUnit) -> bool {
        self.contains_id(&unit.unit_id) || self.contains_serial(&unit.serial_number)
    }

    /// Look up a buffer unit's ID by serial number.
    pub fn id_for_serial(&self, serial_number: &str) -> Option<&str> {
        self.by_serial.get(serial_number).map(String::as_str)
    }

    /// Buffer unit count for a (type, Rh) pair.
    pub fn count_for(&self, blood_type: BloodType, rh_factor: RhFactor) -> u32 {
        let label = super::unit::type_label(blood_type, rh_factor);
        self.counts.get(&label).copied().unwrap_or(0)
    }

    /// Total number of buffered units.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
