//! Allocation plan models.
//!
//! Plans are ephemeral: they are advisory output of the planner and are never
//! persisted. Reservation against the store is what makes a claim real.

use serde::{Deserialize, Serialize};

use super::unit::BloodUnit;

/// One selected unit within a plan. Units are indivisible, so each selection
/// takes exactly one whole unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedUnit {
    /// The selected unit
    pub unit: BloodUnit,
    /// Whether the unit came out of the emergency buffer pool
    pub from_buffer: bool,
}

/// An ordered selection of units answering a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationPlan {
    /// The request this plan was built for
    pub request_id: String,
    /// Units the request asked for
    pub units_requested: u32,
    /// Selected units, in the order they should be taken
    pub selections: Vec<PlannedUnit>,
    /// Requested units that could not be matched to any eligible unit
    pub shortage: u32,
    /// Serial numbers of selected buffer units
    pub buffer_serials_used: Vec<String>,
    /// Operator-visible warning when buffer stock is tapped
    pub warning: Option<String>,
}

impl AllocationPlan {
    /// A plan with no selections (used for zero-unit requests).
    pub fn empty(request_id: String) -> Self {
        Self {
            request_id,
            units_requested: 0,
            selections: Vec::new(),
            shortage: 0,
            buffer_serials_used: Vec::new(),
            warning: None,
        }
    }

    /// Whether the plan fully covers the request. Partial plans are returned
    /// but must never be committed.
    pub fn is_satisfiable(&self) -> bool {
        self.shortage == 0
    }

    /// Number of units selected.
    pub fn units_selected(&self) -> u32 {
        self.selections.len() as u32
    }

    /// IDs of the selected units, in selection order.
    pub fn unit_ids(&self) -> Vec<String> {
        self.selections
            .iter()
            .map(|s| s.unit.unit_id.clone())
            .collect()
    }

    /// Whether any buffer stock was selected.
    pub fn buffer_used(&self) -> bool {
        !self.buffer_serials_used.is_empty()
    }
}
