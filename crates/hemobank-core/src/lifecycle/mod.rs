//! Request lifecycle state machine.
//!
//! States: Pending, Rescheduled, Approved, HandedOver (terminal),
//! Declined (terminal).
//!
//! ```text
//! Pending | Rescheduled --approve--> Approved --handover--> HandedOver
//!        |      ^                       |
//!        |      '---- cancel approval --'   (release reserved units)
//!        '--decline--> Declined
//! ```
//!
//! Approval requires a shortage-free plan whose units were all reserved;
//! handover commits the reservation; everything else leaves units untouched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::allocation::{
    AllocationError, AllocationPlanner, InventoryCatalog, Reservation, ReservationCoordinator,
};
use crate::compat::{compatible_donors, DonorMatch};
use crate::db::{Database, DbError};
use crate::models::{AllocationPlan, BloodRequest, RequestStatus};

/// Days a shortage-blocked request is deferred when the operator reschedules.
pub const DEFAULT_RESCHEDULE_DAYS: i64 = 3;

/// Lifecycle errors.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    /// The request is not in a state that admits this action. No state was
    /// mutated.
    #[error("Cannot {action} a request in state {from:?}")]
    IllegalTransition {
        from: RequestStatus,
        action: &'static str,
    },

    /// Compatible supply cannot cover the request. Recoverable: the operator
    /// may wait, reschedule, or decline.
    #[error("Insufficient supply: {available} of {requested} unit(s) available (short {shortage}) across compatible types {compatible_types:?}")]
    InsufficientSupply {
        requested: u32,
        available: u32,
        shortage: u32,
        compatible_types: Vec<String>,
    },
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Read-only fulfillment preview for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FulfillmentPreview {
    /// Whether the request can be fully covered right now
    pub can_fulfill: bool,
    /// Eligible compatible units currently in stock
    pub available_count: u32,
    /// Units the request asks for
    pub required_count: u32,
    /// Whether fulfilling would dip into the emergency buffer
    pub buffer_will_be_used: bool,
    /// Operator-facing summary
    pub message: String,
}

/// Outcome of a successful approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalOutcome {
    /// Units now reserved for the request, in allocation order
    pub reserved_unit_ids: Vec<String>,
    /// Buffer warning from the plan, if buffer stock was tapped
    pub buffer_warning: Option<String>,
}

/// Drives blood requests through their status state machine, invoking the
/// planner and coordinator at the right transitions.
pub struct RequestLifecycleManager<'a> {
    db: &'a Database,
}

impl<'a> RequestLifecycleManager<'a> {
    /// Create a manager over the given store.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Read-only preview: can this request be fulfilled right now, and would
    /// doing so dip into the buffer? No side effects.
    pub fn check_fulfillment(&self, request_id: &str) -> LifecycleResult<FulfillmentPreview> {
        let request = self.load_request(request_id)?;
        let now = Utc::now();
        let (plan, available) = self.build_plan(&request, now)?;

        let can_fulfill = plan.is_satisfiable();
        let message = if let Some(warning) = &plan.warning {
            format!("Request can be fulfilled. {}", warning)
        } else if can_fulfill {
            format!(
                "Request can be fulfilled from {} compatible unit(s) in stock",
                available
            )
        } else {
            format!(
                "Only {} of {} requested unit(s) available across compatible types",
                plan.units_selected(),
                request.units_requested
            )
        };

        Ok(FulfillmentPreview {
            can_fulfill,
            available_count: available,
            required_count: request.units_requested,
            buffer_will_be_used: plan.buffer_used(),
            message,
        })
    }

    /// Approve a pending or rescheduled request: plan, reserve, and mark
    /// Approved. A shortage leaves the request untouched and surfaces the
    /// detail; a reservation conflict means supply moved between planning
    /// and reserving; re-plan and retry.
    pub fn approve(&self, request_id: &str) -> LifecycleResult<ApprovalOutcome> {
        let request = self.load_request(request_id)?;
        if !request.status.is_actionable() {
            return Err(LifecycleError::IllegalTransition {
                from: request.status,
                action: "approve",
            });
        }

        let now = Utc::now();
        let (plan, available) = self.build_plan(&request, now)?;
        if !plan.is_satisfiable() {
            let donors = compatible_donors(request.patient_blood_type, request.patient_rh_factor);
            return Err(LifecycleError::InsufficientSupply {
                requested: request.units_requested,
                available,
                shortage: plan.shortage,
                compatible_types: donors.iter().map(DonorMatch::label).collect(),
            });
        }

        let coordinator = ReservationCoordinator::new(self.db);
        let reservation = coordinator.reserve(&plan)?;

        if !self
            .db
            .update_request_status(request_id, &RequestStatus::Approved)?
        {
            // Request row vanished between load and update: hand the units back
            coordinator.release(&reservation.unit_ids)?;
            return Err(LifecycleError::RequestNotFound(request_id.to_string()));
        }

        info!(
            request_id = %request_id,
            units = reservation.unit_ids.len(),
            buffer = plan.buffer_used(),
            "request approved"
        );
        Ok(ApprovalOutcome {
            reserved_unit_ids: reservation.unit_ids,
            buffer_warning: plan.warning,
        })
    }

    /// Hand over an approved request: commit the reserved units and mark the
    /// request HandedOver. Irreversible. On a partial commit the request is
    /// NOT advanced and the error carries both unit buckets.
    pub fn handover(&self, request_id: &str) -> LifecycleResult<Vec<String>> {
        let request = self.load_request(request_id)?;
        if !matches!(request.status, RequestStatus::Approved) {
            return Err(LifecycleError::IllegalTransition {
                from: request.status,
                action: "hand over",
            });
        }

        let reserved = self.db.units_reserved_for(request_id)?;
        if reserved.is_empty() {
            // Approved but holding nothing: reservation was reclaimed
            warn!(request_id = %request_id, "approved request holds no reservations");
            return Err(LifecycleError::Validation(format!(
                "No units reserved for request {}; re-approve before handover",
                request_id
            )));
        }

        let reservation = Reservation {
            request_id: request_id.to_string(),
            unit_ids: reserved.into_iter().map(|u| u.unit_id).collect(),
            reserved_at: Utc::now(),
        };

        let coordinator = ReservationCoordinator::new(self.db);
        let committed = coordinator.commit(&reservation)?;

        self.db
            .update_request_status(request_id, &RequestStatus::HandedOver)?;
        info!(request_id = %request_id, units = committed.len(), "request handed over");
        Ok(committed)
    }

    /// Cancel an approval before handover: release the reserved units and
    /// return the request to Pending.
    pub fn cancel_approval(&self, request_id: &str) -> LifecycleResult<usize> {
        let request = self.load_request(request_id)?;
        if !matches!(request.status, RequestStatus::Approved) {
            return Err(LifecycleError::IllegalTransition {
                from: request.status,
                action: "cancel approval of",
            });
        }

        let reserved = self.db.units_reserved_for(request_id)?;
        let unit_ids: Vec<String> = reserved.into_iter().map(|u| u.unit_id).collect();
        let coordinator = ReservationCoordinator::new(self.db);
        let released = coordinator.release(&unit_ids)?;

        self.db
            .update_request_status(request_id, &RequestStatus::Pending)?;
        info!(request_id = %request_id, released, "approval cancelled");
        Ok(released)
    }

    /// Decline a pending or rescheduled request with a mandatory reason.
    pub fn decline(&self, request_id: &str, reason: &str) -> LifecycleResult<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::Validation(
                "Decline reason must not be empty".into(),
            ));
        }

        let request = self.load_request(request_id)?;
        if !request.status.is_actionable() {
            return Err(LifecycleError::IllegalTransition {
                from: request.status,
                action: "decline",
            });
        }

        self.db.mark_request_declined(request_id, reason)?;
        info!(request_id = %request_id, reason = %reason, "request declined");
        Ok(())
    }

    /// Defer a shortage-blocked request: explicit operator-triggered move to
    /// Rescheduled with a retry time `defer_days` from now (default 3).
    pub fn reschedule(
        &self,
        request_id: &str,
        defer_days: Option<i64>,
    ) -> LifecycleResult<DateTime<Utc>> {
        let days = defer_days.unwrap_or(DEFAULT_RESCHEDULE_DAYS);
        if days <= 0 {
            return Err(LifecycleError::Validation(
                "Reschedule deferral must be positive".into(),
            ));
        }

        let request = self.load_request(request_id)?;
        if !request.status.is_actionable() {
            return Err(LifecycleError::IllegalTransition {
                from: request.status,
                action: "reschedule",
            });
        }

        let retry_at = Utc::now() + Duration::days(days);
        self.db.mark_request_rescheduled(request_id, retry_at)?;
        info!(request_id = %request_id, retry_at = %retry_at, "request rescheduled");
        Ok(retry_at)
    }

    fn load_request(&self, request_id: &str) -> LifecycleResult<BloodRequest> {
        self.db
            .get_request(request_id)?
            .ok_or_else(|| LifecycleError::RequestNotFound(request_id.to_string()))
    }

    /// Plan against current supply. Returns the plan and the total eligible
    /// compatible unit count (for shortage breakdowns).
    fn build_plan(
        &self,
        request: &BloodRequest,
        now: DateTime<Utc>,
    ) -> LifecycleResult<(AllocationPlan, u32)> {
        let donors = compatible_donors(request.patient_blood_type, request.patient_rh_factor);
        let catalog = InventoryCatalog::new(self.db);
        let available = catalog.available_units(&donors, now)?;
        let pool = self.db.buffer_pool()?;
        let plan = AllocationPlanner::plan(request, &available, &pool);
        Ok((plan, available.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodType, BloodUnit, RhFactor, UnitStatus};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn insert_unit(
        db: &Database,
        serial: &str,
        blood_type: BloodType,
        rh: RhFactor,
        expires_in_days: i64,
    ) -> BloodUnit {
        let now = Utc::now();
        let unit = BloodUnit::new(
            serial.into(),
            blood_type,
            rh,
            now - Duration::days(1),
            now + Duration::days(expires_in_days),
        );
        db.insert_unit(&unit).unwrap();
        unit
    }

    fn insert_request(db: &Database, blood_type: BloodType, rh: RhFactor, units: u32) -> BloodRequest {
        let request = BloodRequest::new("General".into(), blood_type, rh, units);
        db.insert_request(&request).unwrap();
        request
    }

    #[test]
    fn test_approve_reserves_and_marks_approved() {
        let db = setup_db();
        insert_unit(&db, "SN-1", BloodType::A, RhFactor::Positive, 5);
        insert_unit(&db, "SN-2", BloodType::A, RhFactor::Positive, 10);
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 2);

        let manager = RequestLifecycleManager::new(&db);
        let outcome = manager.approve(&request.request_id).unwrap();
        assert_eq!(outcome.reserved_unit_ids.len(), 2);
        assert!(outcome.buffer_warning.is_none());

        let approved = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(approved.status, RequestStatus::Approved));

        let reserved = db.units_reserved_for(&request.request_id).unwrap();
        assert_eq!(reserved.len(), 2);
    }

    #[test]
    fn test_approve_shortage_leaves_request_untouched() {
        let db = setup_db();
        insert_unit(&db, "SN-1", BloodType::AB, RhFactor::Negative, 5);
        insert_unit(&db, "SN-2", BloodType::O, RhFactor::Negative, 5);
        let request = insert_request(&db, BloodType::AB, RhFactor::Negative, 5);

        let manager = RequestLifecycleManager::new(&db);
        let err = manager.approve(&request.request_id).unwrap_err();
        match err {
            LifecycleError::InsufficientSupply {
                requested,
                available,
                shortage,
                compatible_types,
            } => {
                assert_eq!(requested, 5);
                assert_eq!(available, 2);
                assert_eq!(shortage, 3);
                assert_eq!(compatible_types, vec!["AB-", "A-", "B-", "O-"]);
            }
            other => panic!("expected InsufficientSupply, got {:?}", other),
        }

        // No state change, nothing reserved
        let request = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(request.status, RequestStatus::Pending));
        assert!(db.units_reserved_for(&request.request_id).unwrap().is_empty());
    }

    #[test]
    fn test_approve_terminal_request_rejected() {
        let db = setup_db();
        insert_unit(&db, "SN-1", BloodType::A, RhFactor::Positive, 5);
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 1);
        db.mark_request_declined(&request.request_id, "test").unwrap();

        let manager = RequestLifecycleManager::new(&db);
        let err = manager.approve(&request.request_id).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IllegalTransition {
                from: RequestStatus::Declined,
                ..
            }
        ));
    }

    #[test]
    fn test_full_lifecycle_to_handover() {
        let db = setup_db();
        insert_unit(&db, "SN-1", BloodType::O, RhFactor::Positive, 3);
        insert_unit(&db, "SN-2", BloodType::O, RhFactor::Positive, 10);
        let request = insert_request(&db, BloodType::O, RhFactor::Positive, 2);

        let manager = RequestLifecycleManager::new(&db);
        manager.approve(&request.request_id).unwrap();
        let committed = manager.handover(&request.request_id).unwrap();
        assert_eq!(committed.len(), 2);

        let done = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(done.status, RequestStatus::HandedOver));

        for unit_id in &committed {
            let unit = db.get_unit(unit_id).unwrap().unwrap();
            assert!(matches!(unit.status, UnitStatus::HandedOver));
            assert_eq!(
                unit.assigned_request_id.as_deref(),
                Some(request.request_id.as_str())
            );
        }

        // Terminal: approving again is illegal
        let err = manager.approve(&request.request_id).unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { .. }));
    }

    #[test]
    fn test_handover_requires_approved() {
        let db = setup_db();
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 1);

        let manager = RequestLifecycleManager::new(&db);
        let err = manager.handover(&request.request_id).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IllegalTransition {
                from: RequestStatus::Pending,
                ..
            }
        ));
    }

    #[test]
    fn test_cancel_approval_releases_units() {
        let db = setup_db();
        insert_unit(&db, "SN-1", BloodType::A, RhFactor::Positive, 5);
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 1);

        let manager = RequestLifecycleManager::new(&db);
        manager.approve(&request.request_id).unwrap();
        let released = manager.cancel_approval(&request.request_id).unwrap();
        assert_eq!(released, 1);

        let back = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(back.status, RequestStatus::Pending));
        assert!(db.units_reserved_for(&request.request_id).unwrap().is_empty());

        // The unit is allocatable again: a second approval succeeds
        manager.approve(&request.request_id).unwrap();
    }

    #[test]
    fn test_decline_requires_reason() {
        let db = setup_db();
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 1);

        let manager = RequestLifecycleManager::new(&db);
        let err = manager.decline(&request.request_id, "   ").unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        manager.decline(&request.request_id, "duplicate").unwrap();
        let declined = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(declined.status, RequestStatus::Declined));
        assert_eq!(declined.decline_reason.as_deref(), Some("duplicate"));

        // Terminal: declining again is illegal
        let err = manager.decline(&request.request_id, "again").unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { .. }));
    }

    #[test]
    fn test_reschedule_defers_three_days_by_default() {
        let db = setup_db();
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 1);

        let manager = RequestLifecycleManager::new(&db);
        let retry_at = manager.reschedule(&request.request_id, None).unwrap();

        let rescheduled = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(rescheduled.status, RequestStatus::Rescheduled));
        assert_eq!(rescheduled.when_needed, Some(retry_at));

        let deferred_by = retry_at - Utc::now();
        assert!(deferred_by > Duration::days(2) && deferred_by <= Duration::days(3));

        // A rescheduled request is still approvable
        insert_unit(&db, "SN-1", BloodType::A, RhFactor::Positive, 5);
        manager.approve(&request.request_id).unwrap();
    }

    #[test]
    fn test_check_fulfillment_preview() {
        let db = setup_db();
        insert_unit(&db, "SN-1", BloodType::A, RhFactor::Positive, 5);
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 2);

        let manager = RequestLifecycleManager::new(&db);
        let preview = manager.check_fulfillment(&request.request_id).unwrap();
        assert!(!preview.can_fulfill);
        assert_eq!(preview.available_count, 1);
        assert_eq!(preview.required_count, 2);
        assert!(!preview.buffer_will_be_used);
        assert!(preview.message.contains("1 of 2"));

        // Preview has no side effects
        let untouched = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(untouched.status, RequestStatus::Pending));
        assert!(db.units_reserved_for(&request.request_id).unwrap().is_empty());
    }

    #[test]
    fn test_check_fulfillment_flags_buffer_use() {
        let db = setup_db();
        let unit = insert_unit(&db, "SN-BUF", BloodType::A, RhFactor::Positive, 5);
        db.move_to_buffer(&unit.unit_id).unwrap();
        let request = insert_request(&db, BloodType::A, RhFactor::Positive, 1);

        let manager = RequestLifecycleManager::new(&db);
        let preview = manager.check_fulfillment(&request.request_id).unwrap();
        assert!(preview.can_fulfill);
        assert!(preview.buffer_will_be_used);
        assert!(preview.message.contains("SN-BUF"));
    }

    #[test]
    fn test_missing_request() {
        let db = setup_db();
        let manager = RequestLifecycleManager::new(&db);
        let err = manager.check_fulfillment("nope").unwrap_err();
        assert!(matches!(err, LifecycleError::RequestNotFound(_)));
    }
}
