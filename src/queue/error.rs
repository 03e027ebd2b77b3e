use thiserror::Error;
use uuid::Uuid;

use super::QueueStatus;

pub const APPOINTMENT_SCOPE_CONSTRAINT: &str = "appointment_active_scope_key";
pub const QUEUE_NUMBER_CONSTRAINT: &str = "queue_entry_scope_number_key";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("patient {0} not found")]
    PatientNotFound(Uuid),

    #[error("doctor {0} not found")]
    DoctorNotFound(Uuid),

    #[error("queue entry {0} not found")]
    QueueEntryNotFound(Uuid),

    #[error("appointment {0} not found")]
    AppointmentNotFound(Uuid),

    #[error("patient already holds an active appointment with this doctor on this date")]
    DuplicateAppointment,

    #[error("queue number already taken in this scope")]
    DuplicateAllocation,

    #[error("cannot move queue entry from {from} to {to}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("queue entry {0} changed concurrently")]
    Conflict(Uuid),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::DuplicateAllocation)
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => match db.constraint() {
                Some(APPOINTMENT_SCOPE_CONSTRAINT) => QueueError::DuplicateAppointment,
                Some(QUEUE_NUMBER_CONSTRAINT) => QueueError::DuplicateAllocation,
                _ => QueueError::Store(e.to_string()),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => QueueError::StoreUnavailable(e.to_string()),
            _ => QueueError::Store(e.to_string()),
        }
    }
}
