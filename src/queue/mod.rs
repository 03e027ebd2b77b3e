// src/queue/mod.rs

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;
pub mod pg_store;
pub mod service;
pub mod store;

#[cfg(test)]
pub mod memory_store;

pub use error::QueueError;
pub use service::QueueService;
pub use store::QueueStore;

/// Stored as smallint; discriminants follow the forward lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting = 0,
    Called = 1,
    InService = 2,
    Completed = 3,
    Cancelled = 4,
}

impl QueueStatus {
    pub const ACTIVE: [QueueStatus; 3] = [
        QueueStatus::Waiting,
        QueueStatus::Called,
        QueueStatus::InService,
    ];

    pub const SERVING: [QueueStatus; 2] = [QueueStatus::Called, QueueStatus::InService];

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }

    /// Position on the forward path `Waiting -> Called -> InService -> Completed`.
    /// `Cancelled` sits off the path.
    fn rank(self) -> Option<u8> {
        match self {
            QueueStatus::Waiting => Some(0),
            QueueStatus::Called => Some(1),
            QueueStatus::InService => Some(2),
            QueueStatus::Completed => Some(3),
            QueueStatus::Cancelled => None,
        }
    }

    /// The single transition table for queue entries.
    ///
    /// Any strictly-forward move along the service path is allowed (a doctor may
    /// start serving a patient who was never formally called). Cancellation is only
    /// reachable before service starts. Terminal states never move, and same-state
    /// moves are rejected so a repeated "call" is an error rather than a no-op.
    pub fn can_transition_to(self, target: QueueStatus) -> bool {
        if self.is_terminal() || self == target {
            return false;
        }
        match target {
            QueueStatus::Cancelled => matches!(self, QueueStatus::Waiting | QueueStatus::Called),
            _ => match (self.rank(), target.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Called => "called",
            QueueStatus::InService => "in_service",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Higher value is served first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal = 0,
    Urgent = 1,
}

/// Appointment lifecycle as far as the booking flow cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Confirmed = 0,
    Completed = 1,
    Cancelled = 2,
}

/// Actor tag handed to the service by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient = 0,
    Admin = 1,
    Doctor = 2,
}

impl Role {
    pub fn can_operate_queue(self) -> bool {
        matches!(self, Role::Admin | Role::Doctor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Admin => "admin",
            Role::Doctor => "doctor",
        }
    }
}

/// `(doctor_id, service_date)`: the bound of one numbering sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueScope {
    pub doctor_id: Uuid,
    pub service_date: NaiveDate,
}

impl QueueScope {
    pub fn new(doctor_id: Uuid, service_date: NaiveDate) -> Self {
        Self {
            doctor_id,
            service_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub queue_id: Uuid,
    pub queue_number: i32,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    /// Name as it was when the entry was created. Never re-resolved from the
    /// patient record, so it goes stale if the patient is renamed later.
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub service_date: NaiveDate,
    pub status: QueueStatus,
    pub priority: Priority,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn scope(&self) -> QueueScope {
        QueueScope::new(self.doctor_id, self.service_date)
    }

    /// Timestamps the entry would carry after moving to `target` at `now`.
    pub fn stamps_for(&self, target: QueueStatus, now: DateTime<Utc>) -> StatusChange {
        let called_at = match target {
            QueueStatus::Called | QueueStatus::InService | QueueStatus::Completed => {
                self.called_at.or(Some(now))
            }
            _ => self.called_at,
        };
        let completed_at = if target == QueueStatus::Completed {
            Some(now)
        } else {
            self.completed_at
        };
        StatusChange {
            target,
            called_at,
            completed_at,
        }
    }
}

/// Serving order: priority descending, then queue number ascending.
pub fn serving_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.queue_number.cmp(&b.queue_number))
}

/// Conditional update payload; applied only while the row still holds the expected status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub target: QueueStatus,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub patient_id: Uuid,
    pub scope: QueueScope,
    pub time_slot: NaiveTime,
    pub complaint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookingReceipt {
    pub appointment_id: Uuid,
    pub queue_id: Uuid,
    pub queue_number: i32,
}

/// Patient-facing notification text written by the stores.
pub mod notice {
    use chrono::NaiveDate;

    pub const REGISTERED_TITLE: &str = "Registration successful";
    pub const CALLED_TITLE: &str = "Your number is being called";

    pub fn registered(queue_number: i32, service_date: NaiveDate) -> String {
        format!("Your queue number: {queue_number}. Date: {service_date}")
    }

    pub fn called(queue_number: i32) -> String {
        format!("Queue number {queue_number} is being called. Please proceed to the examination room.")
    }
}

/// Queue entry that is not backed by an appointment.
#[derive(Debug, Clone)]
pub struct WalkIn {
    pub scope: QueueScope,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [QueueStatus; 5] = [
        QueueStatus::Waiting,
        QueueStatus::Called,
        QueueStatus::InService,
        QueueStatus::Completed,
        QueueStatus::Cancelled,
    ];

    fn entry(number: i32, priority: Priority) -> QueueEntry {
        QueueEntry {
            queue_id: Uuid::new_v4(),
            queue_number: number,
            appointment_id: None,
            patient_id: None,
            patient_name: format!("patient {number}"),
            doctor_id: Uuid::nil(),
            service_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            status: QueueStatus::Waiting,
            priority,
            called_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_states_never_move() {
        for target in ALL {
            assert!(!QueueStatus::Completed.can_transition_to(target));
            assert!(!QueueStatus::Cancelled.can_transition_to(target));
        }
    }

    #[test]
    fn same_state_is_rejected() {
        for s in ALL {
            assert!(!s.can_transition_to(s), "{s} -> {s} must be rejected");
        }
    }

    #[test]
    fn backward_moves_are_rejected() {
        assert!(!QueueStatus::Called.can_transition_to(QueueStatus::Waiting));
        assert!(!QueueStatus::InService.can_transition_to(QueueStatus::Called));
        assert!(!QueueStatus::InService.can_transition_to(QueueStatus::Waiting));
        assert!(!QueueStatus::Completed.can_transition_to(QueueStatus::Waiting));
    }

    #[test]
    fn cancel_only_before_service() {
        assert!(QueueStatus::Waiting.can_transition_to(QueueStatus::Cancelled));
        assert!(QueueStatus::Called.can_transition_to(QueueStatus::Cancelled));
        assert!(!QueueStatus::InService.can_transition_to(QueueStatus::Cancelled));
    }

    #[test]
    fn forward_moves_are_allowed() {
        assert!(QueueStatus::Waiting.can_transition_to(QueueStatus::Called));
        assert!(QueueStatus::Called.can_transition_to(QueueStatus::InService));
        assert!(QueueStatus::InService.can_transition_to(QueueStatus::Completed));
        assert!(QueueStatus::Waiting.can_transition_to(QueueStatus::InService));
    }

    #[test]
    fn urgent_goes_first_then_lowest_number() {
        let mut entries = vec![
            entry(3, Priority::Normal),
            entry(4, Priority::Urgent),
            entry(1, Priority::Normal),
            entry(2, Priority::Urgent),
        ];
        entries.sort_by(serving_order);
        let order: Vec<i32> = entries.iter().map(|e| e.queue_number).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn stamps_follow_target() {
        let now = Utc::now();
        let e = entry(1, Priority::Normal);

        let called = e.stamps_for(QueueStatus::Called, now);
        assert_eq!(called.called_at, Some(now));
        assert_eq!(called.completed_at, None);

        let cancelled = e.stamps_for(QueueStatus::Cancelled, now);
        assert_eq!(cancelled.called_at, None);
        assert_eq!(cancelled.completed_at, None);

        let mut in_service = e.clone();
        let earlier = now - chrono::Duration::minutes(5);
        in_service.called_at = Some(earlier);
        let done = in_service.stamps_for(QueueStatus::Completed, now);
        assert_eq!(done.called_at, Some(earlier));
        assert_eq!(done.completed_at, Some(now));
    }

    #[test]
    fn status_serializes_snake_case() {
        let v = serde_json::to_value(QueueStatus::InService).unwrap();
        assert_eq!(v, serde_json::json!("in_service"));
        let p: Priority = serde_json::from_value(serde_json::json!("urgent")).unwrap();
        assert_eq!(p, Priority::Urgent);
    }
}
