//! Emergency buffer pool queries.

use super::{Database, DbResult};
use crate::models::{BufferPool, UnitStatus};

impl Database {
    /// Snapshot the emergency reserve pool.
    ///
    /// The snapshot is advisory, like planning itself: membership is read
    /// once per planning pass and correctness is enforced at reservation
    /// time, not here.
    pub fn buffer_pool(&self) -> DbResult<BufferPool> {
        let units = self.list_units_by_status(&UnitStatus::Buffer)?;
        Ok(BufferPool::from_units(&units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodType, BloodUnit, RhFactor};
    use chrono::{Duration, Utc};

    fn make_unit(serial: &str, blood_type: BloodType, rh: RhFactor) -> BloodUnit {
        let now = Utc::now();
        BloodUnit::new(
            serial.into(),
            blood_type,
            rh,
            now - Duration::days(1),
            now + Duration::days(30),
        )
    }

    #[test]
    fn test_buffer_pool_snapshot() {
        let db = Database::open_in_memory().unwrap();

        let buffered = make_unit("SN-1", BloodType::O, RhFactor::Negative);
        let normal = make_unit("SN-2", BloodType::O, RhFactor::Negative);
        db.insert_unit(&buffered).unwrap();
        db.insert_unit(&normal).unwrap();
        db.move_to_buffer(&buffered.unit_id).unwrap();

        let pool = db.buffer_pool().unwrap();
        assert_eq!(pool.total(), 1);
        assert!(pool.contains_id(&buffered.unit_id));
        assert!(pool.contains_serial("SN-1"));
        assert!(!pool.contains_id(&normal.unit_id));
        assert_eq!(pool.count_for(BloodType::O, RhFactor::Negative), 1);
    }

    #[test]
    fn test_empty_buffer_pool() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.buffer_pool().unwrap();
        assert!(pool.is_empty());
    }
}
