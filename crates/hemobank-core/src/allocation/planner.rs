//! Allocation planner.
//!
//! Selection order, strongest rule first:
//! 1. Exact (type, Rh) match before any compatible substitute, then
//!    substitutes in resolver priority order.
//! 2. Within each type: non-buffer stock before buffer stock, even when a
//!    buffer unit expires sooner.
//! 3. Within each of those queues: earliest expiry first.
//!
//! Planning is advisory; it may run against a stale snapshot. The
//! reservation step is what makes a selection real.

use std::collections::HashSet;

use crate::compat::compatible_donors;
use crate::models::{AllocationPlan, BloodRequest, BloodUnit, BufferPool, PlannedUnit};

/// Builds ordered selection plans for blood requests.
pub struct AllocationPlanner;

impl AllocationPlanner {
    /// Build a plan for `request` from an already-filtered, expiry-ordered
    /// catalog view (see `InventoryCatalog::available_units`).
    ///
    /// Always returns a plan; a plan with `shortage > 0` is a shortage
    /// report, not a fulfillment, and callers must never commit it. A request
    /// for zero units yields an empty plan.
    pub fn plan(
        request: &BloodRequest,
        available: &[BloodUnit],
        buffer_pool: &BufferPool,
    ) -> AllocationPlan {
        let target = request.units_requested as usize;
        let mut selections: Vec<PlannedUnit> = Vec::with_capacity(target.min(available.len()));
        let mut selected_ids: HashSet<&str> = HashSet::new();

        let donors = compatible_donors(request.patient_blood_type, request.patient_rh_factor);
        for donor in &donors {
            if selections.len() >= target {
                break;
            }

            // Partition this type's queue: buffer stock goes to the back,
            // expiry order preserved within each half.
            let (non_buffer, buffer): (Vec<&BloodUnit>, Vec<&BloodUnit>) = available
                .iter()
                .filter(|u| u.matches_type(donor.blood_type, donor.rh_factor))
                .partition(|u| !buffer_pool.contains_unit(u));

            for unit in non_buffer.into_iter().chain(buffer) {
                if selections.len() >= target {
                    break;
                }
                if !selected_ids.insert(unit.unit_id.as_str()) {
                    continue;
                }
                selections.push(PlannedUnit {
                    unit: unit.clone(),
                    from_buffer: buffer_pool.contains_unit(unit),
                });
            }
        }

        let shortage = target.saturating_sub(selections.len()) as u32;
        let buffer_serials_used: Vec<String> = selections
            .iter()
            .filter(|s| s.from_buffer)
            .map(|s| s.unit.serial_number.clone())
            .collect();
        let warning = if buffer_serials_used.is_empty() {
            None
        } else {
            Some(format!(
                "Emergency buffer stock allocated: {}",
                buffer_serials_used.join(", ")
            ))
        };

        AllocationPlan {
            request_id: request.request_id.clone(),
            units_requested: request.units_requested,
            selections,
            shortage,
            buffer_serials_used,
            warning,
        }
    }
}
