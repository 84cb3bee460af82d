//! Blood request database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::units::{parse_blood_type, parse_rh_factor};
use super::{parse_opt_timestamp, parse_timestamp, timestamp_to_string, Database, DbError, DbResult};
use crate::models::{BloodRequest, RequestStatus};

const REQUEST_COLUMNS: &str = "request_id, hospital_name, patient_blood_type, patient_rh_factor, \
     units_requested, status, when_needed, is_urgent, decline_reason, created_at, updated_at";

impl Database {
    /// Insert a new blood request.
    pub fn insert_request(&self, request: &BloodRequest) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO blood_requests (
                request_id, hospital_name, patient_blood_type, patient_rh_factor,
                units_requested, status, when_needed, is_urgent, decline_reason,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                request.request_id,
                request.hospital_name,
                request.patient_blood_type.as_str(),
                request.patient_rh_factor.as_str(),
                request.units_requested,
                status_to_string(&request.status),
                request.when_needed.map(timestamp_to_string),
                request.is_urgent,
                request.decline_reason,
                timestamp_to_string(request.created_at),
                timestamp_to_string(request.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Get a request by ID.
    pub fn get_request(&self, request_id: &str) -> DbResult<Option<BloodRequest>> {
        self.conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM blood_requests WHERE request_id = ?"),
                [request_id],
                map_request_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List requests by status, most recently updated first.
    pub fn list_requests_by_status(&self, status: &RequestStatus) -> DbResult<Vec<BloodRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM blood_requests WHERE status = ? \
             ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map([status_to_string(status)], map_request_row)?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }

    /// Update a request's status.
    pub fn update_request_status(
        &self,
        request_id: &str,
        status: &RequestStatus,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE blood_requests SET status = ?2, updated_at = ?3 WHERE request_id = ?1",
            params![
                request_id,
                status_to_string(status),
                timestamp_to_string(Utc::now()),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Mark a request declined, recording the reason in the same write so the
    /// schema's declined-requires-reason check holds.
    pub fn mark_request_declined(&self, request_id: &str, reason: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE blood_requests SET status = 'declined', decline_reason = ?2, updated_at = ?3 \
             WHERE request_id = ?1",
            params![request_id, reason, timestamp_to_string(Utc::now())],
        )?;
        Ok(rows_affected > 0)
    }

    /// Mark a request rescheduled with a deferred retry time.
    pub fn mark_request_rescheduled(
        &self,
        request_id: &str,
        when_needed: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE blood_requests SET status = 'rescheduled', when_needed = ?2, updated_at = ?3 \
             WHERE request_id = ?1",
            params![
                request_id,
                timestamp_to_string(when_needed),
                timestamp_to_string(Utc::now()),
            ],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct RequestRow {
    request_id: String,
    hospital_name: String,
    patient_blood_type: String,
    patient_rh_factor: String,
    units_requested: u32,
    status: String,
    when_needed: Option<String>,
    is_urgent: bool,
    decline_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        request_id: row.get(0)?,
        hospital_name: row.get(1)?,
        patient_blood_type: row.get(2)?,
        patient_rh_factor: row.get(3)?,
        units_requested: row.get(4)?,
        status: row.get(5)?,
        when_needed: row.get(6)?,
        is_urgent: row.get(7)?,
        decline_reason: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl TryFrom<RequestRow> for BloodRequest {
    type Error = DbError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(BloodRequest {
            request_id: row.request_id,
            hospital_name: row.hospital_name,
            patient_blood_type: parse_blood_type(&row.patient_blood_type)?,
            patient_rh_factor: parse_rh_factor(&row.patient_rh_factor)?,
            units_requested: row.units_requested,
            status: string_to_status(&row.status)?,
            when_needed: parse_opt_timestamp(row.when_needed.as_deref())?,
            is_urgent: row.is_urgent,
            decline_reason: row.decline_reason,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn status_to_string(status: &RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Rescheduled => "rescheduled",
        RequestStatus::Approved => "approved",
        RequestStatus::HandedOver => "handed_over",
        RequestStatus::Declined => "declined",
    }
}

fn string_to_status(s: &str) -> Result<RequestStatus, DbError> {
    match s {
        "pending" => Ok(RequestStatus::Pending),
        "rescheduled" => Ok(RequestStatus::Rescheduled),
        "approved" => Ok(RequestStatus::Approved),
        "handed_over" => Ok(RequestStatus::HandedOver),
        "declined" => Ok(RequestStatus::Declined),
        _ => Err(DbError::Constraint(format!("Unknown request status: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodType, RhFactor};
    use chrono::Duration;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_request(units: u32) -> BloodRequest {
        BloodRequest::new("General".into(), BloodType::AB, RhFactor::Negative, units)
    }

    #[test]
    fn test_insert_and_get_request() {
        let db = setup_db();
        let mut request = make_request(3);
        request.is_urgent = true;
        request.when_needed = Some(Utc::now() + Duration::days(2));
        db.insert_request(&request).unwrap();

        let retrieved = db.get_request(&request.request_id).unwrap().unwrap();
        assert_eq!(retrieved, request);
    }

    #[test]
    fn test_get_missing_request() {
        let db = setup_db();
        assert!(db.get_request("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_status() {
        let db = setup_db();
        let request = make_request(1);
        db.insert_request(&request).unwrap();

        assert!(db
            .update_request_status(&request.request_id, &RequestStatus::Approved)
            .unwrap());
        let updated = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(updated.status, RequestStatus::Approved));

        // Unknown request: no rows touched
        assert!(!db
            .update_request_status("nope", &RequestStatus::Approved)
            .unwrap());
    }

    #[test]
    fn test_decline_records_reason() {
        let db = setup_db();
        let request = make_request(1);
        db.insert_request(&request).unwrap();

        assert!(db
            .mark_request_declined(&request.request_id, "duplicate request")
            .unwrap());
        let declined = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(declined.status, RequestStatus::Declined));
        assert_eq!(declined.decline_reason.as_deref(), Some("duplicate request"));
    }

    #[test]
    fn test_reschedule_sets_when_needed() {
        let db = setup_db();
        let request = make_request(1);
        db.insert_request(&request).unwrap();

        let retry_at = Utc::now() + Duration::days(3);
        assert!(db
            .mark_request_rescheduled(&request.request_id, retry_at)
            .unwrap());
        let rescheduled = db.get_request(&request.request_id).unwrap().unwrap();
        assert!(matches!(rescheduled.status, RequestStatus::Rescheduled));
        assert_eq!(rescheduled.when_needed, Some(retry_at));
    }

    #[test]
    fn test_list_by_status() {
        let db = setup_db();
        let first = make_request(1);
        let second = make_request(2);
        db.insert_request(&first).unwrap();
        db.insert_request(&second).unwrap();
        db.update_request_status(&second.request_id, &RequestStatus::Approved)
            .unwrap();

        let pending = db.list_requests_by_status(&RequestStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, first.request_id);

        let approved = db.list_requests_by_status(&RequestStatus::Approved).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].request_id, second.request_id);
    }
}
