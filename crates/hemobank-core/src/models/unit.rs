//! Blood unit models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ABO blood group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BloodType {
    O,
    A,
    B,
    AB,
}

impl BloodType {
    /// Canonical string form ("O", "A", "B", "AB").
    pub fn as_str(&self) -> &'static str {
        match self {
            BloodType::O => "O",
            BloodType::A => "A",
            BloodType::B => "B",
            BloodType::AB => "AB",
        }
    }

    /// Parse a blood type from dashboard/store text.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "O" => Some(BloodType::O),
            "A" => Some(BloodType::A),
            "B" => Some(BloodType::B),
            "AB" => Some(BloodType::AB),
            _ => None,
        }
    }
}

/// Rh factor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RhFactor {
    Positive,
    Negative,
}

impl RhFactor {
    /// Canonical string form ("positive", "negative").
    pub fn as_str(&self) -> &'static str {
        match self {
            RhFactor::Positive => "positive",
            RhFactor::Negative => "negative",
        }
    }

    /// Sign suffix for display ("+" or "-").
    pub fn sign(&self) -> &'static str {
        match self {
            RhFactor::Positive => "+",
            RhFactor::Negative => "-",
        }
    }

    /// Parse an Rh factor from dashboard/store text.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "pos" | "+" => Some(RhFactor::Positive),
            "negative" | "neg" | "-" => Some(RhFactor::Negative),
            _ => None,
        }
    }
}

/// Display label for a (type, Rh) pair, e.g. "A+" or "O-".
pub fn type_label(blood_type: BloodType, rh_factor: RhFactor) -> String {
    format!("{}{}", blood_type.as_str(), rh_factor.sign())
}

/// Stored status of a blood unit.
///
/// `Reserved` is never stored: the reservation protocol tracks claims via the
/// `reserved`/`reserved_for` fields so a released buffer unit falls back to
/// `Buffer`, not `Valid`. See [`BloodUnit::effective_status`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Eligible for normal allocation
    Valid,
    /// Held back in the emergency reserve pool (allocated last resort)
    Buffer,
    /// Provisionally claimed by a pending approval (derived, never stored)
    Reserved,
    /// Past its expiry date, awaiting disposal
    Expired,
    /// Physically discarded
    Disposed,
    /// Handed over to a hospital against a request
    HandedOver,
}

impl UnitStatus {
    /// Whether a unit in this status may appear in an allocation plan.
    pub fn is_allocatable(&self) -> bool {
        matches!(self, UnitStatus::Valid | UnitStatus::Buffer)
    }
}

/// A single physical collected blood unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloodUnit {
    /// Opaque unique identifier
    pub unit_id: String,
    /// Human-readable serial number, unique per unit
    pub serial_number: String,
    /// ABO group of the donation
    pub blood_type: BloodType,
    /// Rh factor of the donation
    pub rh_factor: RhFactor,
    /// Collection timestamp
    pub collected_at: DateTime<Utc>,
    /// Expiry timestamp; the unit is expired once now >= expires_at
    pub expires_at: DateTime<Utc>,
    /// Stored status
    pub status: UnitStatus,
    /// Exactly-once reservation flag (flipped by conditional reserve)
    pub reserved: bool,
    /// Request holding the provisional claim, set at reserve time
    pub reserved_for: Option<String>,
    /// When the provisional claim was taken (stale-reservation reclamation)
    pub reserved_at: Option<DateTime<Utc>>,
    /// Request this unit was handed over against, set only on commit
    pub assigned_request_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl BloodUnit {
    /// Create a new valid unit from collection intake.
    pub fn new(
        serial_number: String,
        blood_type: BloodType,
        rh_factor: RhFactor,
        collected_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            unit_id: uuid::Uuid::new_v4().to_string(),
            serial_number,
            blood_type,
            rh_factor,
            collected_at,
            expires_at,
            status: UnitStatus::Valid,
            reserved: false,
            reserved_for: None,
            reserved_at: None,
            assigned_request_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the unit is expired as of the given instant.
    ///
    /// Checked against the clock rather than the stored status: the disposal
    /// sweep that rewrites `status` may lag.
    pub fn is_expired_as_of(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the unit may be selected for allocation as of the given instant.
    pub fn is_allocatable_as_of(&self, now: DateTime<Utc>) -> bool {
        self.status.is_allocatable()
            && !self.reserved
            && self.assigned_request_id.is_none()
            && !self.is_expired_as_of(now)
    }

    /// Status as seen by the dashboard: a live reservation reads as Reserved.
    pub fn effective_status(&self) -> UnitStatus {
        if self.reserved && self.status.is_allocatable() {
            UnitStatus::Reserved
        } else {
            self.status
        }
    }

    /// Whether this unit exactly matches a requested (type, Rh).
    pub fn matches_type(&self, blood_type: BloodType, rh_factor: RhFactor) -> bool {
        self.blood_type == blood_type && self.rh_factor == rh_factor
    }

    /// Display label for this unit's type, e.g. "O-".
    pub fn type_label(&self) -> String {
        type_label(self.blood_type, self.rh_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_unit(expires_in_days: i64) -> BloodUnit {
        let now = Utc::now();
        BloodUnit::new(
            "SN-0001".into(),
            BloodType::O,
            RhFactor::Positive,
            now - Duration::days(1),
            now + Duration::days(expires_in_days),
        )
    }

    #[test]
    fn test_new_unit_is_allocatable() {
        let unit = make_unit(10);
        assert!(matches!(unit.status, UnitStatus::Valid));
        assert!(unit.is_allocatable_as_of(Utc::now()));
        assert_eq!(unit.unit_id.len(), 36);
    }

    #[test]
    fn test_expiry_check_ignores_stale_status() {
        let mut unit = make_unit(10);
        unit.expires_at = Utc::now() - Duration::hours(1);
        // Status still says Valid, but the clock disagrees
        assert!(matches!(unit.status, UnitStatus::Valid));
        assert!(unit.is_expired_as_of(Utc::now()));
        assert!(!unit.is_allocatable_as_of(Utc::now()));
    }

    #[test]
    fn test_reserved_unit_not_allocatable() {
        let mut unit = make_unit(10);
        unit.reserved = true;
        unit.reserved_for = Some("req-1".into());
        assert!(!unit.is_allocatable_as_of(Utc::now()));
        assert!(matches!(unit.effective_status(), UnitStatus::Reserved));
    }

    #[test]
    fn test_released_buffer_unit_falls_back_to_buffer() {
        let mut unit = make_unit(10);
        unit.status = UnitStatus::Buffer;
        unit.reserved = true;
        assert!(matches!(unit.effective_status(), UnitStatus::Reserved));

        unit.reserved = false;
        assert!(matches!(unit.effective_status(), UnitStatus::Buffer));
    }

    #[test]
    fn test_assigned_unit_not_allocatable() {
        let mut unit = make_unit(10);
        unit.assigned_request_id = Some("req-1".into());
        assert!(!unit.is_allocatable_as_of(Utc::now()));
    }

    #[test]
    fn test_type_parsing() {
        assert_eq!(BloodType::parse("AB"), Some(BloodType::AB));
        assert_eq!(BloodType::parse(" o "), Some(BloodType::O));
        assert_eq!(BloodType::parse("C"), None);
        assert_eq!(RhFactor::parse("Positive"), Some(RhFactor::Positive));
        assert_eq!(RhFactor::parse("-"), Some(RhFactor::Negative));
        assert_eq!(RhFactor::parse("unknown"), None);
    }

    #[test]
    fn test_type_label() {
        assert_eq!(type_label(BloodType::AB, RhFactor::Negative), "AB-");
        assert_eq!(make_unit(1).type_label(), "O+");
    }
}
