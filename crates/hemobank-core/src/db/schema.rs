//! SQLite schema definition.

/// Complete database schema for hemobank.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Blood Requests
-- ============================================================================

CREATE TABLE IF NOT EXISTS blood_requests (
    request_id TEXT PRIMARY KEY,
    hospital_name TEXT NOT NULL,
    patient_blood_type TEXT NOT NULL CHECK (patient_blood_type IN ('O', 'A', 'B', 'AB')),
    patient_rh_factor TEXT NOT NULL CHECK (patient_rh_factor IN ('positive', 'negative')),
    units_requested INTEGER NOT NULL CHECK (units_requested > 0),
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'rescheduled', 'approved', 'handed_over', 'declined')),
    when_needed TEXT,
    is_urgent INTEGER NOT NULL DEFAULT 0,
    decline_reason TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    -- A declined request must carry a non-empty reason
    CHECK (status <> 'declined' OR (decline_reason IS NOT NULL AND length(decline_reason) > 0))
);

CREATE INDEX IF NOT EXISTS idx_requests_status ON blood_requests(status);
CREATE INDEX IF NOT EXISTS idx_requests_hospital ON blood_requests(hospital_name);

-- ============================================================================
-- Blood Units
-- ============================================================================

-- Reservation state lives in reserved/reserved_for/reserved_at, not in status:
-- a released buffer unit must fall back to 'buffer', not 'valid'.
CREATE TABLE IF NOT EXISTS blood_units (
    unit_id TEXT PRIMARY KEY,
    serial_number TEXT NOT NULL UNIQUE,
    blood_type TEXT NOT NULL CHECK (blood_type IN ('O', 'A', 'B', 'AB')),
    rh_factor TEXT NOT NULL CHECK (rh_factor IN ('positive', 'negative')),
    collected_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'valid'
        CHECK (status IN ('valid', 'buffer', 'expired', 'disposed', 'handed_over')),
    reserved INTEGER NOT NULL DEFAULT 0,
    reserved_for TEXT REFERENCES blood_requests(request_id),
    reserved_at TEXT,
    assigned_request_id TEXT REFERENCES blood_requests(request_id),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- A unit handed over against one request is never re-assigned to another
CREATE TRIGGER IF NOT EXISTS blood_units_guard_reassign BEFORE UPDATE ON blood_units
WHEN old.assigned_request_id IS NOT NULL
     AND new.assigned_request_id IS NOT old.assigned_request_id
BEGIN
    SELECT RAISE(ABORT, 'Unit already assigned to a request');
END;

-- Allocation scans filter by status and walk expiry order
CREATE INDEX IF NOT EXISTS idx_units_allocation ON blood_units(status, expires_at);
CREATE INDEX IF NOT EXISTS idx_units_reserved_for ON blood_units(reserved_for);
CREATE INDEX IF NOT EXISTS idx_units_assigned ON blood_units(assigned_request_id);
"#;
