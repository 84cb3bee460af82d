//! ABO/Rh compatibility resolver.
//!
//! A single fixed table of transfusion-medicine rules, shared by every
//! consumer of the allocation engine. Priorities encode allocation order:
//! an exact (type, Rh) match is always highest, and O- as the universal
//! donor is always lowest: it is spent last so it stays available for
//! recipients no other stock can serve.

use serde::{Deserialize, Serialize};

use crate::models::{type_label, BloodType, RhFactor};

/// A donor (type, Rh) acceptable for a given recipient, with its
/// allocation priority (higher = preferred).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DonorMatch {
    /// Donor ABO group
    pub blood_type: BloodType,
    /// Donor Rh factor
    pub rh_factor: RhFactor,
    /// Allocation priority, higher preferred; exact match is always highest
    pub priority: u8,
}

impl DonorMatch {
    /// Display label, e.g. "O-".
    pub fn label(&self) -> String {
        type_label(self.blood_type, self.rh_factor)
    }
}

/// Acceptable donor types for a recipient, highest priority first.
pub fn compatible_donors(
    recipient_type: BloodType,
    recipient_rh: RhFactor,
) -> Vec<DonorMatch> {
    use BloodType::*;
    use RhFactor::*;

    let table: &[(BloodType, RhFactor, u8)] = match (recipient_type, recipient_rh) {
        (O, Positive) => &[(O, Positive, 2), (O, Negative, 1)],
        (O, Negative) => &[(O, Negative, 1)],
        (A, Positive) => &[(A, Positive, 4), (A, Negative, 3), (O, Positive, 2), (O, Negative, 1)],
        (A, Negative) => &[(A, Negative, 2), (O, Negative, 1)],
        (B, Positive) => &[(B, Positive, 4), (B, Negative, 3), (O, Positive, 2), (O, Negative, 1)],
        (B, Negative) => &[(B, Negative, 2), (O, Negative, 1)],
        (AB, Positive) => &[
            (AB, Positive, 8),
            (AB, Negative, 7),
            (A, Positive, 6),
            (A, Negative, 5),
            (B, Positive, 4),
            (B, Negative, 3),
            (O, Positive, 2),
            (O, Negative, 1),
        ],
        (AB, Negative) => &[(AB, Negative, 4), (A, Negative, 3), (B, Negative, 2), (O, Negative, 1)],
    };

    table
        .iter()
        .map(|&(blood_type, rh_factor, priority)| DonorMatch {
            blood_type,
            rh_factor,
            priority,
        })
        .collect()
}

/// The (type, Rh) keys of the donor list, preserving priority order.
pub fn donor_type_keys(donors: &[DonorMatch]) -> Vec<(BloodType, RhFactor)> {
    donors.iter().map(|d| (d.blood_type, d.rh_factor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PAIRS: [(BloodType, RhFactor); 8] = [
        (BloodType::O, RhFactor::Positive),
        (BloodType::O, RhFactor::Negative),
        (BloodType::A, RhFactor::Positive),
        (BloodType::A, RhFactor::Negative),
        (BloodType::B, RhFactor::Positive),
        (BloodType::B, RhFactor::Negative),
        (BloodType::AB, RhFactor::Positive),
        (BloodType::AB, RhFactor::Negative),
    ];

    #[test]
    fn test_every_recipient_accepts_exact_match_first() {
        for (blood_type, rh_factor) in ALL_PAIRS {
            let donors = compatible_donors(blood_type, rh_factor);
            assert!(!donors.is_empty());

            let top = &donors[0];
            assert_eq!(top.blood_type, blood_type);
            assert_eq!(top.rh_factor, rh_factor);
            assert!(
                donors.iter().skip(1).all(|d| d.priority < top.priority),
                "exact match must be strictly highest priority for {}",
                type_label(blood_type, rh_factor)
            );
        }
    }

    #[test]
    fn test_priorities_strictly_decreasing() {
        for (blood_type, rh_factor) in ALL_PAIRS {
            let donors = compatible_donors(blood_type, rh_factor);
            for pair in donors.windows(2) {
                assert!(pair[0].priority > pair[1].priority);
            }
        }
    }

    #[test]
    fn test_o_negative_universal_and_always_last() {
        for (blood_type, rh_factor) in ALL_PAIRS {
            let donors = compatible_donors(blood_type, rh_factor);
            let last = donors.last().unwrap();
            assert_eq!(last.blood_type, BloodType::O);
            assert_eq!(last.rh_factor, RhFactor::Negative);
            assert_eq!(last.priority, 1);
        }
    }

    #[test]
    fn test_negative_recipients_accept_only_negative_donors() {
        for (blood_type, _) in ALL_PAIRS {
            let donors = compatible_donors(blood_type, RhFactor::Negative);
            assert!(donors
                .iter()
                .all(|d| matches!(d.rh_factor, RhFactor::Negative)));
        }
    }

    #[test]
    fn test_o_negative_accepts_only_itself() {
        let donors = compatible_donors(BloodType::O, RhFactor::Negative);
        assert_eq!(donors.len(), 1);
        assert_eq!(donors[0].label(), "O-");
    }

    #[test]
    fn test_ab_positive_accepts_all_eight() {
        let donors = compatible_donors(BloodType::AB, RhFactor::Positive);
        assert_eq!(donors.len(), 8);

        let labels: Vec<String> = donors.iter().map(|d| d.label()).collect();
        assert_eq!(
            labels,
            vec!["AB+", "AB-", "A+", "A-", "B+", "B-", "O+", "O-"]
        );
    }

    #[test]
    fn test_a_positive_table() {
        let donors = compatible_donors(BloodType::A, RhFactor::Positive);
        let expected: Vec<(String, u8)> = vec![
            ("A+".into(), 4),
            ("A-".into(), 3),
            ("O+".into(), 2),
            ("O-".into(), 1),
        ];
        let actual: Vec<(String, u8)> = donors.iter().map(|d| (d.label(), d.priority)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_ab_negative_table() {
        let donors = compatible_donors(BloodType::AB, RhFactor::Negative);
        let actual: Vec<(String, u8)> = donors.iter().map(|d| (d.label(), d.priority)).collect();
        assert_eq!(
            actual,
            vec![
                ("AB-".into(), 4),
                ("A-".into(), 3),
                ("B-".into(), 2),
                ("O-".into(), 1)
            ]
        );
    }
}
