use async_trait::async_trait;
use uuid::Uuid;

use super::{
    Booking, BookingReceipt, QueueEntry, QueueError, QueueScope, QueueStatus, StatusChange, WalkIn,
};

/// Persistence port for the queue.
///
/// Every method is one atomic unit against the store: either all of its writes
/// become visible or none do. Numbering must be serialised by the store itself,
/// never by the caller.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appointment + next queue number + queue entry + patient notification.
    async fn insert_booking(&self, booking: &Booking) -> Result<BookingReceipt, QueueError>;

    /// Next queue number + queue entry without an appointment.
    async fn insert_walk_in(&self, walk_in: &WalkIn) -> Result<QueueEntry, QueueError>;

    async fn find_entry(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError>;

    async fn find_entry_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<QueueEntry>, QueueError>;

    /// Applies `change` only while the row still holds `expected`.
    /// `Ok(None)` means zero rows matched.
    async fn compare_and_set_status(
        &self,
        queue_id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
    ) -> Result<Option<QueueEntry>, QueueError>;

    async fn entries_in_scope(
        &self,
        scope: QueueScope,
        statuses: &[QueueStatus],
    ) -> Result<Vec<QueueEntry>, QueueError>;
}
