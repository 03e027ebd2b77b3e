// src/queue/service.rs

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{
    serving_order, Booking, BookingReceipt, QueueEntry, QueueError, QueueScope, QueueStatus,
    QueueStore, Role, WalkIn,
};

#[derive(Debug, Clone, Serialize)]
pub struct PatientQueueStatus {
    pub entry: QueueEntry,
    pub currently_serving: Option<i32>,
    /// Active entries ordered ahead of this one; `None` once the entry is terminal.
    pub ahead: Option<usize>,
}

/// Queue allocation and status lifecycle on top of a [`QueueStore`].
///
/// Stateless: every call reads from and writes to the store, so any number of
/// handlers (in any number of processes) can share one store.
#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn QueueStore>,
}

/// Runs `op`, and runs it exactly once more if it lost a numbering race.
async fn retry_allocation_once<T, F, Fut>(scope: QueueScope, mut op: F) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    match op().await {
        Err(e) if e.is_retryable() => {
            tracing::warn!(
                doctor_id = %scope.doctor_id,
                service_date = %scope.service_date,
                "queue number collision, retrying allocation"
            );
            op().await
        }
        other => other,
    }
}

impl QueueService {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Registers a walk-in and returns its entry carrying the allocated number.
    pub async fn allocate_queue_number(&self, walk_in: &WalkIn) -> Result<QueueEntry, QueueError> {
        let entry =
            retry_allocation_once(walk_in.scope, || self.store.insert_walk_in(walk_in)).await?;

        tracing::info!(
            queue_id = %entry.queue_id,
            doctor_id = %entry.doctor_id,
            service_date = %entry.service_date,
            queue_number = entry.queue_number,
            "walk-in queue number allocated"
        );
        Ok(entry)
    }

    pub async fn create_appointment_with_queue(
        &self,
        booking: &Booking,
    ) -> Result<BookingReceipt, QueueError> {
        let receipt =
            retry_allocation_once(booking.scope, || self.store.insert_booking(booking)).await?;

        tracing::info!(
            appointment_id = %receipt.appointment_id,
            patient_id = %booking.patient_id,
            doctor_id = %booking.scope.doctor_id,
            service_date = %booking.scope.service_date,
            queue_number = receipt.queue_number,
            "appointment booked"
        );
        Ok(receipt)
    }

    pub async fn transition_status(
        &self,
        queue_id: Uuid,
        target: QueueStatus,
        actor: Role,
    ) -> Result<QueueEntry, QueueError> {
        if !actor.can_operate_queue() {
            return Err(QueueError::Forbidden(
                "only doctors and admins can change queue status",
            ));
        }

        let current = self
            .store
            .find_entry(queue_id)
            .await?
            .ok_or(QueueError::QueueEntryNotFound(queue_id))?;

        if !current.status.can_transition_to(target) {
            return Err(QueueError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let change = current.stamps_for(target, Utc::now());
        let Some(updated) = self
            .store
            .compare_and_set_status(queue_id, current.status, &change)
            .await?
        else {
            tracing::warn!(%queue_id, expected = %current.status, "stale queue status, update lost");
            return Err(QueueError::Conflict(queue_id));
        };

        tracing::info!(
            %queue_id,
            queue_number = updated.queue_number,
            from = %current.status,
            to = %updated.status,
            actor = actor.as_str(),
            "queue status changed"
        );
        Ok(updated)
    }

    /// Lowest number among entries currently called or in service.
    pub async fn currently_serving(&self, scope: QueueScope) -> Result<Option<i32>, QueueError> {
        let serving = self
            .store
            .entries_in_scope(scope, &QueueStatus::SERVING)
            .await?;

        Ok(serving
            .iter()
            .filter(|e| QueueStatus::SERVING.contains(&e.status))
            .map(|e| e.queue_number)
            .min())
    }

    /// Non-terminal entries in serving order, recomputed on every call.
    pub async fn next_in_line(&self, scope: QueueScope) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = self
            .store
            .entries_in_scope(scope, &QueueStatus::ACTIVE)
            .await?;

        entries.retain(|e| !e.status.is_terminal());
        entries.sort_by(serving_order);
        Ok(entries)
    }

    /// Queue view for the patient who owns `appointment_id`.
    pub async fn patient_queue_status(
        &self,
        appointment_id: Uuid,
        patient_id: Uuid,
    ) -> Result<PatientQueueStatus, QueueError> {
        let entry = self
            .store
            .find_entry_by_appointment(appointment_id)
            .await?
            .filter(|e| e.patient_id == Some(patient_id))
            .ok_or(QueueError::AppointmentNotFound(appointment_id))?;

        let scope = entry.scope();
        let line = self.next_in_line(scope).await?;
        let currently_serving = line
            .iter()
            .filter(|e| QueueStatus::SERVING.contains(&e.status))
            .map(|e| e.queue_number)
            .min();
        let ahead = line.iter().position(|e| e.queue_id == entry.queue_id);

        Ok(PatientQueueStatus {
            entry,
            currently_serving,
            ahead,
        })
    }
}
