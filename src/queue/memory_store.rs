//! In-process [`QueueStore`] used by the service tests. Each call holds one lock for
//! its whole body, which stands in for the transaction of the Postgres store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{
    notice, AppointmentStatus, Booking, BookingReceipt, Priority, QueueEntry, QueueError, QueueScope,
    QueueStatus, QueueStore, StatusChange, WalkIn,
};

struct Appointment {
    appointment_id: Uuid,
    patient_id: Uuid,
    scope: QueueScope,
    status: AppointmentStatus,
}

#[derive(Default)]
struct State {
    patients: HashMap<Uuid, String>,
    doctors: HashSet<Uuid>,
    appointments: Vec<Appointment>,
    entries: Vec<QueueEntry>,
    counters: HashMap<QueueScope, i32>,
    notifications: Vec<(Uuid, String)>,
}

impl State {
    fn next_number(&mut self, scope: QueueScope) -> i32 {
        let n = self.counters.entry(scope).or_insert(0);
        *n += 1;
        *n
    }

    fn new_entry(&self, queue_number: i32, scope: QueueScope, priority: Priority) -> QueueEntry {
        QueueEntry {
            queue_id: Uuid::new_v4(),
            queue_number,
            appointment_id: None,
            patient_id: None,
            patient_name: String::new(),
            doctor_id: scope.doctor_id,
            service_date: scope.service_date,
            status: QueueStatus::Waiting,
            priority,
            called_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    state: Mutex<State>,
    failing_allocations: AtomicU32,
}

impl MemoryQueueStore {
    pub fn add_doctor(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().doctors.insert(id);
        id
    }

    pub fn add_patient(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().patients.insert(id, name.to_string());
        id
    }

    /// Makes the next `n` allocations fail as if the unique constraint fired.
    pub fn fail_next_allocations(&self, n: u32) {
        self.failing_allocations.store(n, Ordering::SeqCst);
    }

    pub async fn notifications_for(&self, patient_id: Uuid) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|(p, _)| *p == patient_id)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_allocations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_booking(&self, booking: &Booking) -> Result<BookingReceipt, QueueError> {
        let scope = booking.scope;
        let mut state = self.state.lock().unwrap();

        let patient_name = state
            .patients
            .get(&booking.patient_id)
            .cloned()
            .ok_or(QueueError::PatientNotFound(booking.patient_id))?;
        if !state.doctors.contains(&scope.doctor_id) {
            return Err(QueueError::DoctorNotFound(scope.doctor_id));
        }
        if state.appointments.iter().any(|a| {
            a.patient_id == booking.patient_id
                && a.scope == scope
                && a.status != AppointmentStatus::Cancelled
        }) {
            return Err(QueueError::DuplicateAppointment);
        }
        if self.take_injected_failure() {
            return Err(QueueError::DuplicateAllocation);
        }

        let appointment_id = Uuid::new_v4();
        let queue_number = state.next_number(scope);
        let mut entry = state.new_entry(queue_number, scope, Priority::Normal);
        entry.appointment_id = Some(appointment_id);
        entry.patient_id = Some(booking.patient_id);
        entry.patient_name = patient_name;
        let queue_id = entry.queue_id;

        state.appointments.push(Appointment {
            appointment_id,
            patient_id: booking.patient_id,
            scope,
            status: AppointmentStatus::Confirmed,
        });
        state.entries.push(entry);
        state.notifications.push((
            booking.patient_id,
            notice::registered(queue_number, scope.service_date),
        ));

        Ok(BookingReceipt {
            appointment_id,
            queue_id,
            queue_number,
        })
    }

    async fn insert_walk_in(&self, walk_in: &WalkIn) -> Result<QueueEntry, QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.doctors.contains(&walk_in.scope.doctor_id) {
            return Err(QueueError::DoctorNotFound(walk_in.scope.doctor_id));
        }
        if let Some(patient_id) = walk_in.patient_id {
            if !state.patients.contains_key(&patient_id) {
                return Err(QueueError::PatientNotFound(patient_id));
            }
        }
        if self.take_injected_failure() {
            return Err(QueueError::DuplicateAllocation);
        }

        let queue_number = state.next_number(walk_in.scope);
        let mut entry = state.new_entry(queue_number, walk_in.scope, walk_in.priority);
        entry.patient_id = walk_in.patient_id;
        entry.patient_name = walk_in.patient_name.clone();
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn find_entry(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let state = self.state.lock().unwrap();
        Ok(state.entries.iter().find(|e| e.queue_id == queue_id).cloned())
    }

    async fn find_entry_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .find(|e| e.appointment_id == Some(appointment_id))
            .cloned())
    }

    async fn compare_and_set_status(
        &self,
        queue_id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.queue_id == queue_id && e.status == expected)
        else {
            return Ok(None);
        };

        entry.status = change.target;
        entry.called_at = change.called_at;
        entry.completed_at = change.completed_at;
        let updated = entry.clone();

        let appointment_status = match change.target {
            QueueStatus::Completed => Some(AppointmentStatus::Completed),
            QueueStatus::Cancelled => Some(AppointmentStatus::Cancelled),
            _ => None,
        };
        if let (Some(id), Some(status)) = (updated.appointment_id, appointment_status) {
            if let Some(a) = state.appointments.iter_mut().find(|a| a.appointment_id == id) {
                a.status = status;
            }
        }
        if let (QueueStatus::Called, Some(patient_id)) = (change.target, updated.patient_id) {
            state
                .notifications
                .push((patient_id, notice::called(updated.queue_number)));
        }

        Ok(Some(updated))
    }

    async fn entries_in_scope(
        &self,
        scope: QueueScope,
        statuses: &[QueueStatus],
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.scope() == scope && statuses.contains(&e.status))
            .cloned()
            .collect())
    }
}
