//! Hospital blood request models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::unit::{type_label, BloodType, RhFactor};

/// Request lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting operator action
    Pending,
    /// Deferred after a shortage; retried at the new when_needed time
    Rescheduled,
    /// Units reserved, awaiting physical handover
    Approved,
    /// Units committed and handed over
    HandedOver,
    /// Rejected by an operator with a reason
    Declined,
}

impl RequestStatus {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::HandedOver | RequestStatus::Declined)
    }

    /// Whether a request in this state may be approved, declined or rescheduled.
    pub fn is_actionable(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Rescheduled)
    }
}

/// A hospital's ask for blood units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloodRequest {
    /// Unique request ID
    pub request_id: String,
    /// Requesting hospital
    pub hospital_name: String,
    /// Recipient ABO group
    pub patient_blood_type: BloodType,
    /// Recipient Rh factor
    pub patient_rh_factor: RhFactor,
    /// Number of whole units asked for (always > 0)
    pub units_requested: u32,
    /// Lifecycle status
    pub status: RequestStatus,
    /// Deadline, if the hospital stated one
    pub when_needed: Option<DateTime<Utc>>,
    /// Urgent flag from the requesting hospital
    pub is_urgent: bool,
    /// Reason recorded when the request was declined
    pub decline_reason: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl BloodRequest {
    /// Create a new pending request.
    pub fn new(
        hospital_name: String,
        patient_blood_type: BloodType,
        patient_rh_factor: RhFactor,
        units_requested: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            hospital_name,
            patient_blood_type,
            patient_rh_factor,
            units_requested,
            status: RequestStatus::Pending,
            when_needed: None,
            is_urgent: false,
            decline_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display label for the requested type, e.g. "AB-".
    pub fn type_label(&self) -> String {
        type_label(self.patient_blood_type, self.patient_rh_factor)
    }
}
