//! Blood unit database operations, including the reservation protocol
//! primitives (conditional reserve, commit, release).

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::{parse_opt_timestamp, parse_timestamp, timestamp_to_string, Database, DbError, DbResult};
use crate::models::{BloodType, BloodUnit, RhFactor, UnitStatus};

const UNIT_COLUMNS: &str = "unit_id, serial_number, blood_type, rh_factor, collected_at, \
     expires_at, status, reserved, reserved_for, reserved_at, assigned_request_id, \
     created_at, updated_at";

impl Database {
    /// Insert a new blood unit.
    pub fn insert_unit(&self, unit: &BloodUnit) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO blood_units (
                unit_id, serial_number, blood_type, rh_factor, collected_at,
                expires_at, status, reserved, reserved_for, reserved_at,
                assigned_request_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                unit.unit_id,
                unit.serial_number,
                unit.blood_type.as_str(),
                unit.rh_factor.as_str(),
                timestamp_to_string(unit.collected_at),
                timestamp_to_string(unit.expires_at),
                stored_status_to_string(&unit.status)?,
                unit.reserved,
                unit.reserved_for,
                unit.reserved_at.map(timestamp_to_string),
                unit.assigned_request_id,
                timestamp_to_string(unit.created_at),
                timestamp_to_string(unit.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Get a unit by ID.
    pub fn get_unit(&self, unit_id: &str) -> DbResult<Option<BloodUnit>> {
        self.conn
            .query_row(
                &format!("SELECT {UNIT_COLUMNS} FROM blood_units WHERE unit_id = ?"),
                [unit_id],
                map_unit_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get a unit by serial number.
    pub fn get_unit_by_serial(&self, serial_number: &str) -> DbResult<Option<BloodUnit>> {
        self.conn
            .query_row(
                &format!("SELECT {UNIT_COLUMNS} FROM blood_units WHERE serial_number = ?"),
                [serial_number],
                map_unit_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List units by stored status.
    pub fn list_units_by_status(&self, status: &UnitStatus) -> DbResult<Vec<BloodUnit>> {
        let status_str = stored_status_to_string(status)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {UNIT_COLUMNS} FROM blood_units WHERE status = ? \
             ORDER BY expires_at ASC, unit_id ASC"
        ))?;

        let rows = stmt.query_map([status_str], map_unit_row)?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row?.try_into()?);
        }
        Ok(units)
    }

    /// Query units eligible for allocation to any of the given (type, Rh)
    /// pairs, ordered earliest-expiring first with ID tie-break.
    ///
    /// Expiry is checked against `now` rather than trusting `status`: the
    /// disposal sweep that rewrites expired units may lag behind the clock.
    pub fn query_available_units(
        &self,
        type_keys: &[(BloodType, RhFactor)],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<BloodUnit>> {
        if type_keys.is_empty() {
            return Ok(Vec::new());
        }

        let type_filter = type_keys
            .iter()
            .map(|_| "(blood_type = ? AND rh_factor = ?)")
            .collect::<Vec<_>>()
            .join(" OR ");

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {UNIT_COLUMNS} FROM blood_units \
             WHERE ({type_filter}) \
               AND status IN ('valid', 'buffer') \
               AND reserved = 0 \
               AND assigned_request_id IS NULL \
               AND expires_at > ? \
             ORDER BY expires_at ASC, unit_id ASC"
        ))?;

        let mut bind: Vec<String> = Vec::with_capacity(type_keys.len() * 2 + 1);
        for (blood_type, rh_factor) in type_keys {
            bind.push(blood_type.as_str().to_string());
            bind.push(rh_factor.as_str().to_string());
        }
        bind.push(timestamp_to_string(now));

        let rows = stmt.query_map(params_from_iter(bind.iter()), map_unit_row)?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row?.try_into()?);
        }
        Ok(units)
    }

    /// Conditionally reserve a unit for a request.
    ///
    /// Single atomic compare-and-swap at the storage layer: the update only
    /// lands if the unit is currently unreserved and unassigned. Returns true
    /// iff this call flipped the flag; a false return means a concurrent
    /// approval won the race.
    pub fn conditional_reserve(
        &self,
        unit_id: &str,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let now_str = timestamp_to_string(now);
        let rows_affected = self.conn.execute(
            r#"
            UPDATE blood_units SET
                reserved = 1,
                reserved_for = ?2,
                reserved_at = ?3,
                updated_at = ?3
            WHERE unit_id = ?1
              AND reserved = 0
              AND assigned_request_id IS NULL
            "#,
            params![unit_id, request_id, now_str],
        )?;
        Ok(rows_affected > 0)
    }

    /// Commit a reserved unit to a request: mark it handed over and record
    /// the assignment. Only lands if this request holds the reservation.
    pub fn commit_unit(
        &self,
        unit_id: &str,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE blood_units SET
                status = 'handed_over',
                assigned_request_id = ?2,
                reserved = 0,
                reserved_for = NULL,
                reserved_at = NULL,
                updated_at = ?3
            WHERE unit_id = ?1
              AND reserved = 1
              AND reserved_for = ?2
              AND assigned_request_id IS NULL
            "#,
            params![unit_id, request_id, timestamp_to_string(now)],
        )?;
        Ok(rows_affected > 0)
    }

    /// Release reservations that were never committed. Units that are not
    /// reserved (or already assigned) are left untouched, so releasing an
    /// already-released unit is a no-op. Returns the number of units released.
    pub fn release_units(&self, unit_ids: &[String]) -> DbResult<usize> {
        let now_str = timestamp_to_string(Utc::now());
        let mut released = 0;
        for unit_id in unit_ids {
            released += self.conn.execute(
                r#"
                UPDATE blood_units SET
                    reserved = 0,
                    reserved_for = NULL,
                    reserved_at = NULL,
                    updated_at = ?2
                WHERE unit_id = ?1
                  AND reserved = 1
                  AND assigned_request_id IS NULL
                "#,
                params![unit_id, now_str],
            )?;
        }
        Ok(released)
    }

    /// Units currently holding a live reservation for the given request.
    pub fn units_reserved_for(&self, request_id: &str) -> DbResult<Vec<BloodUnit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {UNIT_COLUMNS} FROM blood_units \
             WHERE reserved_for = ? AND reserved = 1 AND assigned_request_id IS NULL \
             ORDER BY expires_at ASC, unit_id ASC"
        ))?;

        let rows = stmt.query_map([request_id], map_unit_row)?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row?.try_into()?);
        }
        Ok(units)
    }

    /// Force-release reservations taken before `cutoff` that were never
    /// committed (abandoned approvals). Returns the number released.
    pub fn release_stale_reservations(&self, cutoff: DateTime<Utc>) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE blood_units SET
                reserved = 0,
                reserved_for = NULL,
                reserved_at = NULL,
                updated_at = ?2
            WHERE reserved = 1
              AND assigned_request_id IS NULL
              AND reserved_at < ?1
            "#,
            params![
                timestamp_to_string(cutoff),
                timestamp_to_string(Utc::now())
            ],
        )?;
        Ok(rows_affected)
    }

    /// Disposal sweep support: flag units past expiry. Reserved units are
    /// skipped: their reservation is resolved first, and the allocation
    /// query rechecks expiry against the clock anyway.
    pub fn mark_expired_units(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let now_str = timestamp_to_string(now);
        let rows_affected = self.conn.execute(
            r#"
            UPDATE blood_units SET
                status = 'expired',
                updated_at = ?1
            WHERE status IN ('valid', 'buffer')
              AND reserved = 0
              AND expires_at <= ?1
            "#,
            params![now_str],
        )?;
        Ok(rows_affected)
    }

    /// Mark an expired unit as physically discarded.
    pub fn dispose_unit(&self, unit_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE blood_units SET status = 'disposed', updated_at = ?2 \
             WHERE unit_id = ?1 AND status = 'expired'",
            params![unit_id, timestamp_to_string(Utc::now())],
        )?;
        Ok(rows_affected > 0)
    }

    /// Move a valid, unreserved unit into the emergency buffer pool.
    pub fn move_to_buffer(&self, unit_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE blood_units SET status = 'buffer', updated_at = ?2 \
             WHERE unit_id = ?1 AND status = 'valid' AND reserved = 0",
            params![unit_id, timestamp_to_string(Utc::now())],
        )?;
        Ok(rows_affected > 0)
    }

    /// Return an unreserved buffer unit to the normal pool.
    pub fn return_from_buffer(&self, unit_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE blood_units SET status = 'valid', updated_at = ?2 \
             WHERE unit_id = ?1 AND status = 'buffer' AND reserved = 0",
            params![unit_id, timestamp_to_string(Utc::now())],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct UnitRow {
    unit_id: String,
    serial_number: String,
    blood_type: String,
    rh_factor: String,
    collected_at: String,
    expires_at: String,
    status: String,
    reserved: bool,
    reserved_for: Option<String>,
    reserved_at: Option<String>,
    assigned_request_id: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_unit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnitRow> {
    Ok(UnitRow {
        unit_id: row.get(0)?,
        serial_number: row.get(1)?,
        blood_type: row.get(2)?,
        rh_factor: row.get(3)?,
        collected_at: row.get(4)?,
        expires_at: row.get(5)?,
        status: row.get(6)?,
        reserved: row.get(7)?,
        reserved_for: row.get(8)?,
        reserved_at: row.get(9)?,
        assigned_request_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TryFrom<UnitRow> for BloodUnit {
    type Error = DbError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        Ok(BloodUnit {
            unit_id: row.unit_id,
            serial_number: row.serial_number,
            blood_type: parse_blood_type(&row.blood_type)?,
            rh_factor: parse_rh_factor(&row.rh_factor)?,
            collected_at: parse_timestamp(&row.collected_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
            status: string_to_stored_status(&row.status)?,
            reserved: row.reserved,
            reserved_for: row.reserved_for,
            reserved_at: parse_opt_timestamp(row.reserved_at.as_deref())?,
            assigned_request_id: row.assigned_request_id,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

pub(crate) fn parse_blood_type(s: &str) -> DbResult<BloodType> {
    BloodType::parse(s).ok_or_else(|| DbError::Constraint(format!("Unknown blood type: {}", s)))
}

pub(crate) fn parse_rh_factor(s: &str) -> DbResult<RhFactor> {
    RhFactor::parse(s).ok_or_else(|| DbError::Constraint(format!("Unknown Rh factor: {}", s)))
}

fn stored_status_to_string(status: &UnitStatus) -> DbResult<&'static str> {
    match status {
        UnitStatus::Valid => Ok("valid"),
        UnitStatus::Buffer => Ok("buffer"),
        UnitStatus::Expired => Ok("expired"),
        UnitStatus::Disposed => Ok("disposed"),
        UnitStatus::HandedOver => Ok("handed_over"),
        // Reservation state lives in the reserved/reserved_for columns
        UnitStatus::Reserved => Err(DbError::Constraint(
            "Reserved is a derived status and is never stored".into(),
        )),
    }
}

fn string_to_stored_status(s: &str) -> DbResult<UnitStatus> {
    match s {
        "valid" => Ok(UnitStatus::Valid),
        "buffer" => Ok(UnitStatus::Buffer),
        "expired" => Ok(UnitStatus::Expired),
        "disposed" => Ok(UnitStatus::Disposed),
        "handed_over" => Ok(UnitStatus::HandedOver),
        _ => Err(DbError::Constraint(format!("Unknown unit status: {}", s))),
    }
}
