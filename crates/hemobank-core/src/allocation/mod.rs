//! Blood unit allocation: catalog view, selection planning, and the
//! reserve/commit/release protocol.

mod catalog;
mod coordinator;
mod planner;

pub use catalog::*;
pub use coordinator::*;
pub use planner::*;

use thiserror::Error;

use crate::db::DbError;

/// Allocation errors.
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// A concurrent approval won the race for one or more planned units.
    /// This attempt's reservations were released; re-plan and retry.
    #[error("Reservation conflict on contested unit(s): {unit_ids:?}")]
    ReservationConflict { unit_ids: Vec<String> },

    /// A commit batch landed only partially. Fatal: handed-over units cannot
    /// be un-handed, so this is surfaced for manual reconciliation and never
    /// retried automatically.
    #[error("Partial commit: {committed:?} committed, {failed:?} failed")]
    PartialCommit {
        committed: Vec<String>,
        failed: Vec<String>,
    },
}

pub type AllocationResult<T> = Result<T, AllocationError>;
