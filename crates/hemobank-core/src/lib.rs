//! Hemobank Core Library
//!
//! Blood unit allocation engine for hospital blood-bank dashboards:
//! ABO/Rh compatibility resolution, expiry-ordered unit selection with a
//! protected emergency buffer, and an exactly-once reservation protocol
//! driving the request lifecycle.
//!
//! # Architecture
//!
//! ```text
//! BloodRequest ──> CompatibilityResolver ──> acceptable donor types
//!                            │
//!                   InventoryCatalog
//!              (eligible units, earliest expiry first)
//!                            │
//!                   AllocationPlanner ◄── BufferPool (last resort)
//!                            │
//!                     AllocationPlan (advisory)
//!                            │
//!                 ReservationCoordinator
//!              reserve ── commit ── release
//!          (conditional updates at the store: authoritative)
//!                            │
//!                RequestLifecycleManager
//!     Pending | Rescheduled ──> Approved ──> HandedOver
//!                '────────────> Declined
//! ```
//!
//! # Core Principle
//!
//! **Planning is advisory; reservation is authoritative.** Plans may be built
//! against stale snapshots; the per-unit conditional update at the storage
//! layer is what guarantees a unit is handed to at most one request.
//!
//! # Modules
//!
//! - [`db`]: SQLite store (units, requests, reservation primitives)
//! - [`models`]: Domain types (BloodUnit, BloodRequest, AllocationPlan, BufferPool)
//! - [`compat`]: ABO/Rh compatibility table
//! - [`allocation`]: Catalog view, planner, reservation coordinator
//! - [`lifecycle`]: Request status state machine

pub mod allocation;
pub mod compat;
pub mod db;
pub mod lifecycle;
pub mod models;

// Re-export commonly used types
pub use allocation::{
    AllocationError, AllocationPlanner, InventoryCatalog, Reservation, ReservationCoordinator,
};
pub use compat::{compatible_donors, DonorMatch};
pub use db::Database;
pub use lifecycle::{
    ApprovalOutcome, FulfillmentPreview, LifecycleError, RequestLifecycleManager,
    DEFAULT_RESCHEDULE_DAYS,
};
pub use models::{
    AllocationPlan, BloodRequest, BloodType, BloodUnit, BufferPool, PlannedUnit, RequestStatus,
    RhFactor, UnitStatus,
};

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

// =========================================================================
// Facade Error Type
// =========================================================================

/// Top-level error exposed to the dashboard/API layer.
#[derive(Debug, thiserror::Error)]
pub enum HemobankError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Insufficient supply: {0}")]
    InsufficientSupply(String),

    #[error("Reservation conflict: {0}")]
    ReservationConflict(String),

    #[error("Partial commit, manual reconciliation required: {0}")]
    PartialCommit(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for HemobankError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => HemobankError::NotFound(what),
            other => HemobankError::DatabaseError(other.to_string()),
        }
    }
}

impl From<AllocationError> for HemobankError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::Db(db) => db.into(),
            AllocationError::ReservationConflict { ref unit_ids } => {
                HemobankError::ReservationConflict(format!("contested unit(s) {:?}", unit_ids))
            }
            AllocationError::PartialCommit { .. } => HemobankError::PartialCommit(e.to_string()),
        }
    }
}

impl From<LifecycleError> for HemobankError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Db(db) => db.into(),
            LifecycleError::Allocation(alloc) => alloc.into(),
            LifecycleError::RequestNotFound(id) => HemobankError::NotFound(id),
            LifecycleError::Validation(msg) => HemobankError::InvalidInput(msg),
            LifecycleError::IllegalTransition { .. } => {
                HemobankError::IllegalTransition(e.to_string())
            }
            LifecycleError::InsufficientSupply { .. } => {
                HemobankError::InsufficientSupply(e.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for HemobankError {
    fn from(e: serde_json::Error) -> Self {
        HemobankError::SerializationError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for HemobankError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        HemobankError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine facade for the dashboard/API layer.
pub struct Hemobank {
    db: Arc<Mutex<Database>>,
}

impl Hemobank {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> Result<Self, HemobankError> {
        let db = Database::open(path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Create an in-memory engine (for testing).
    pub fn open_in_memory() -> Result<Self, HemobankError> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    // =========================================================================
    // Unit Intake & Inventory Operations
    // =========================================================================

    /// Register a freshly collected unit.
    pub fn register_unit(
        &self,
        serial_number: &str,
        blood_type: BloodType,
        rh_factor: RhFactor,
        collected_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<BloodUnit, HemobankError> {
        if serial_number.trim().is_empty() {
            return Err(HemobankError::InvalidInput(
                "Serial number must not be empty".into(),
            ));
        }
        if expires_at <= collected_at {
            return Err(HemobankError::InvalidInput(
                "Expiry must be after collection".into(),
            ));
        }

        let unit = BloodUnit::new(
            serial_number.trim().to_string(),
            blood_type,
            rh_factor,
            collected_at,
            expires_at,
        );
        let db = self.db.lock()?;
        db.insert_unit(&unit)?;
        Ok(unit)
    }

    /// Get a unit by ID.
    pub fn get_unit(&self, unit_id: &str) -> Result<Option<BloodUnit>, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.get_unit(unit_id)?)
    }

    /// Find a unit by serial number.
    pub fn find_unit_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<Option<BloodUnit>, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.get_unit_by_serial(serial_number)?)
    }

    /// List units by stored status.
    pub fn list_units_by_status(
        &self,
        status: UnitStatus,
    ) -> Result<Vec<BloodUnit>, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.list_units_by_status(&status)?)
    }

    /// Move a valid, unreserved unit into the emergency buffer pool.
    pub fn move_to_buffer(&self, unit_id: &str) -> Result<(), HemobankError> {
        let db = self.db.lock()?;
        if db.move_to_buffer(unit_id)? {
            Ok(())
        } else {
            Err(HemobankError::InvalidInput(format!(
                "Unit {} cannot be moved to buffer (missing, reserved, or not valid)",
                unit_id
            )))
        }
    }

    /// Return an unreserved buffer unit to the normal pool.
    pub fn return_from_buffer(&self, unit_id: &str) -> Result<(), HemobankError> {
        let db = self.db.lock()?;
        if db.return_from_buffer(unit_id)? {
            Ok(())
        } else {
            Err(HemobankError::InvalidInput(format!(
                "Unit {} cannot be returned from buffer (missing, reserved, or not buffered)",
                unit_id
            )))
        }
    }

    /// Snapshot the emergency buffer pool.
    pub fn buffer_pool(&self) -> Result<BufferPool, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.buffer_pool()?)
    }

    /// Disposal sweep: flag units past expiry. Returns the number flagged.
    pub fn sweep_expired(&self) -> Result<usize, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.mark_expired_units(Utc::now())?)
    }

    /// Mark an expired unit as physically discarded.
    pub fn dispose_unit(&self, unit_id: &str) -> Result<(), HemobankError> {
        let db = self.db.lock()?;
        if db.dispose_unit(unit_id)? {
            Ok(())
        } else {
            Err(HemobankError::InvalidInput(format!(
                "Unit {} cannot be disposed (missing or not expired)",
                unit_id
            )))
        }
    }

    // =========================================================================
    // Request Operations
    // =========================================================================

    /// Submit a new hospital request.
    pub fn submit_request(
        &self,
        hospital_name: &str,
        patient_blood_type: BloodType,
        patient_rh_factor: RhFactor,
        units_requested: u32,
        when_needed: Option<DateTime<Utc>>,
        is_urgent: bool,
    ) -> Result<BloodRequest, HemobankError> {
        if hospital_name.trim().is_empty() {
            return Err(HemobankError::InvalidInput(
                "Hospital name must not be empty".into(),
            ));
        }
        if units_requested == 0 {
            return Err(HemobankError::InvalidInput(
                "Requested unit count must be positive".into(),
            ));
        }

        let mut request = BloodRequest::new(
            hospital_name.trim().to_string(),
            patient_blood_type,
            patient_rh_factor,
            units_requested,
        );
        request.when_needed = when_needed;
        request.is_urgent = is_urgent;

        let db = self.db.lock()?;
        db.insert_request(&request)?;
        Ok(request)
    }

    /// Get a request by ID.
    pub fn get_request(&self, request_id: &str) -> Result<Option<BloodRequest>, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.get_request(request_id)?)
    }

    /// List requests by status.
    pub fn list_requests_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<BloodRequest>, HemobankError> {
        let db = self.db.lock()?;
        Ok(db.list_requests_by_status(&status)?)
    }

    // =========================================================================
    // Allocation Engine Operations
    // =========================================================================

    /// Read-only fulfillment preview. No side effects.
    pub fn check_fulfillment(
        &self,
        request_id: &str,
    ) -> Result<FulfillmentPreview, HemobankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db);
        Ok(manager.check_fulfillment(request_id)?)
    }

    /// Approve a request: plan and reserve its units.
    pub fn approve_request(&self, request_id: &str) -> Result<ApprovalOutcome, HemobankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db);
        Ok(manager.approve(request_id)?)
    }

    /// Hand over an approved request; returns the committed unit IDs.
    pub fn handover(&self, request_id: &str) -> Result<Vec<String>, HemobankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db);
        Ok(manager.handover(request_id)?)
    }

    /// Cancel an approval before handover; returns the number of units released.
    pub fn cancel_approval(&self, request_id: &str) -> Result<usize, HemobankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db);
        Ok(manager.cancel_approval(request_id)?)
    }

    /// Decline a request with a mandatory reason.
    pub fn decline(&self, request_id: &str, reason: &str) -> Result<(), HemobankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db);
        Ok(manager.decline(request_id, reason)?)
    }

    /// Defer a shortage-blocked request; returns the new retry time.
    pub fn reschedule(
        &self,
        request_id: &str,
        defer_days: Option<i64>,
    ) -> Result<DateTime<Utc>, HemobankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db);
        Ok(manager.reschedule(request_id, defer_days)?)
    }

    /// Reclaim reservations older than `max_age_minutes` with no commit.
    pub fn release_stale_reservations(
        &self,
        max_age_minutes: i64,
    ) -> Result<usize, HemobankError> {
        let db = self.db.lock()?;
        let coordinator = ReservationCoordinator::new(&db);
        Ok(coordinator.release_stale(Utc::now(), Duration::minutes(max_age_minutes))?)
    }

    // =========================================================================
    // JSON Interop
    // =========================================================================

    /// Fulfillment preview as JSON for the dashboard layer.
    pub fn check_fulfillment_json(&self, request_id: &str) -> Result<String, HemobankError> {
        let preview = self.check_fulfillment(request_id)?;
        Ok(serde_json::to_string(&preview)?)
    }

    /// A request as JSON for the dashboard layer.
    pub fn request_json(&self, request_id: &str) -> Result<String, HemobankError> {
        let request = self
            .get_request(request_id)?
            .ok_or_else(|| HemobankError::NotFound(request_id.to_string()))?;
        Ok(serde_json::to_string(&request)?)
    }
}
