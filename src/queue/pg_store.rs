// src/queue/pg_store.rs

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    notice, AppointmentStatus, Booking, BookingReceipt, Priority, QueueEntry, QueueError, QueueScope,
    QueueStatus, QueueStore, StatusChange, WalkIn,
};
use crate::models::NotificationKind;

#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Increment-and-get on the scope counter.
///
/// The upsert takes a row lock on `(doctor_id, service_date)` that is held until the
/// surrounding transaction ends, so concurrent allocators for the same scope queue up
/// behind it. A rollback also undoes the increment, which keeps numbers gap-free.
async fn next_queue_number(conn: &mut PgConnection, scope: QueueScope) -> Result<i32, QueueError> {
    let n: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO queue_counter (doctor_id, service_date, last_number)
        VALUES ($1, $2, 1)
        ON CONFLICT (doctor_id, service_date)
        DO UPDATE SET last_number = queue_counter.last_number + 1
        RETURNING last_number
        "#,
    )
    .bind(scope.doctor_id)
    .bind(scope.service_date)
    .fetch_one(&mut *conn)
    .await?;

    Ok(n)
}

async fn ensure_active_doctor(conn: &mut PgConnection, doctor_id: Uuid) -> Result<(), QueueError> {
    let found: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT doctor_id
        FROM doctor
        WHERE doctor_id = $1
          AND is_active = true
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&mut *conn)
    .await?;

    found.map(|_| ()).ok_or(QueueError::DoctorNotFound(doctor_id))
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert_booking(&self, booking: &Booking) -> Result<BookingReceipt, QueueError> {
        let scope = booking.scope;
        let mut tx = self.pool.begin().await?;

        let patient_name: String = sqlx::query_scalar(
            r#"
            SELECT full_name
            FROM patient
            WHERE patient_id = $1
            "#,
        )
        .bind(booking.patient_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(QueueError::PatientNotFound(booking.patient_id))?;

        ensure_active_doctor(&mut tx, scope.doctor_id).await?;

        // Fast path; the partial unique index catches the concurrent case.
        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT appointment_id
            FROM appointment
            WHERE patient_id = $1
              AND doctor_id = $2
              AND service_date = $3
              AND status <> $4
            LIMIT 1
            "#,
        )
        .bind(booking.patient_id)
        .bind(scope.doctor_id)
        .bind(scope.service_date)
        .bind(AppointmentStatus::Cancelled)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            return Err(QueueError::DuplicateAppointment);
        }

        let appointment_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO appointment
              (patient_id, patient_name, doctor_id, service_date, time_slot, complaint, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING appointment_id
            "#,
        )
        .bind(booking.patient_id)
        .bind(&patient_name)
        .bind(scope.doctor_id)
        .bind(scope.service_date)
        .bind(booking.time_slot)
        .bind(booking.complaint.as_deref())
        .bind(AppointmentStatus::Confirmed)
        .fetch_one(&mut *tx)
        .await?;

        let queue_number = next_queue_number(&mut tx, scope).await?;

        let queue_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO queue_entry
              (queue_number, appointment_id, patient_id, patient_name, doctor_id, service_date, status, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING queue_id
            "#,
        )
        .bind(queue_number)
        .bind(appointment_id)
        .bind(booking.patient_id)
        .bind(&patient_name)
        .bind(scope.doctor_id)
        .bind(scope.service_date)
        .bind(QueueStatus::Waiting)
        .bind(Priority::Normal)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO notification (patient_id, title, body, kind, queue_status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(booking.patient_id)
        .bind(notice::REGISTERED_TITLE)
        .bind(notice::registered(queue_number, scope.service_date))
        .bind(NotificationKind::Registration)
        .bind(QueueStatus::Waiting)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(BookingReceipt {
            appointment_id,
            queue_id,
            queue_number,
        })
    }

    async fn insert_walk_in(&self, walk_in: &WalkIn) -> Result<QueueEntry, QueueError> {
        let scope = walk_in.scope;
        let mut tx = self.pool.begin().await?;

        ensure_active_doctor(&mut tx, scope.doctor_id).await?;

        if let Some(patient_id) = walk_in.patient_id {
            let found: Option<Uuid> =
                sqlx::query_scalar(r#"SELECT patient_id FROM patient WHERE patient_id = $1"#)
                    .bind(patient_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if found.is_none() {
                return Err(QueueError::PatientNotFound(patient_id));
            }
        }

        let queue_number = next_queue_number(&mut tx, scope).await?;

        let entry: QueueEntry = sqlx::query_as::<_, QueueEntry>(
            r#"
            INSERT INTO queue_entry
              (queue_number, appointment_id, patient_id, patient_name, doctor_id, service_date, status, priority)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7)
            RETURNING queue_id, queue_number, appointment_id, patient_id, patient_name,
                      doctor_id, service_date, status, priority, called_at, completed_at, created_at
            "#,
        )
        .bind(queue_number)
        .bind(walk_in.patient_id)
        .bind(&walk_in.patient_name)
        .bind(scope.doctor_id)
        .bind(scope.service_date)
        .bind(QueueStatus::Waiting)
        .bind(walk_in.priority)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn find_entry(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT queue_id, queue_number, appointment_id, patient_id, patient_name,
                   doctor_id, service_date, status, priority, called_at, completed_at, created_at
            FROM queue_entry
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn find_entry_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT queue_id, queue_number, appointment_id, patient_id, patient_name,
                   doctor_id, service_date, status, priority, called_at, completed_at, created_at
            FROM queue_entry
            WHERE appointment_id = $1
            "#,
        )
        .bind(appointment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn compare_and_set_status(
        &self,
        queue_id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, QueueEntry>(
            r#"
            UPDATE queue_entry
            SET status = $3,
                called_at = $4,
                completed_at = $5
            WHERE queue_id = $1
              AND status = $2
            RETURNING queue_id, queue_number, appointment_id, patient_id, patient_name,
                      doctor_id, service_date, status, priority, called_at, completed_at, created_at
            "#,
        )
        .bind(queue_id)
        .bind(expected)
        .bind(change.target)
        .bind(change.called_at)
        .bind(change.completed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entry) = updated else {
            return Ok(None);
        };

        let appointment_status = match change.target {
            QueueStatus::Completed => Some(AppointmentStatus::Completed),
            QueueStatus::Cancelled => Some(AppointmentStatus::Cancelled),
            _ => None,
        };

        if let (Some(appointment_id), Some(status)) = (entry.appointment_id, appointment_status) {
            sqlx::query(
                r#"
                UPDATE appointment
                SET status = $2, updated_at = now()
                WHERE appointment_id = $1
                "#,
            )
            .bind(appointment_id)
            .bind(status)
            .execute(&mut *tx)
            .await?;
        }

        if let (QueueStatus::Called, Some(patient_id)) = (change.target, entry.patient_id) {
            sqlx::query(
                r#"
                INSERT INTO notification (patient_id, title, body, kind, queue_status)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(patient_id)
            .bind(notice::CALLED_TITLE)
            .bind(notice::called(entry.queue_number))
            .bind(NotificationKind::QueueUpdate)
            .bind(QueueStatus::Called)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn entries_in_scope(
        &self,
        scope: QueueScope,
        statuses: &[QueueStatus],
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let statuses: Vec<i16> = statuses.iter().map(|s| *s as i16).collect();

        let rows = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT queue_id, queue_number, appointment_id, patient_id, patient_name,
                   doctor_id, service_date, status, priority, called_at, completed_at, created_at
            FROM queue_entry
            WHERE doctor_id = $1
              AND service_date = $2
              AND status = ANY($3)
            ORDER BY priority DESC, queue_number ASC
            "#,
        )
        .bind(scope.doctor_id)
        .bind(scope.service_date)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{NaiveDate, NaiveTime, Utc};
    use tokio::task::JoinSet;

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    async fn add_doctor(pool: &PgPool) -> Uuid {
        sqlx::query_scalar(r#"INSERT INTO doctor (full_name) VALUES ('dr. Ahmad') RETURNING doctor_id"#)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn add_patient(pool: &PgPool, seq: u32) -> Uuid {
        sqlx::query_scalar(
            r#"INSERT INTO patient (nik, full_name) VALUES ($1, $2) RETURNING patient_id"#,
        )
        .bind(format!("{:016}", 3374010101900000u64 + u64::from(seq)))
        .bind(format!("Patient {seq}"))
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn booking(patient_id: Uuid, doctor_id: Uuid) -> Booking {
        Booking {
            patient_id,
            scope: QueueScope::new(doctor_id, date()),
            time_slot: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            complaint: None,
        }
    }

    async fn count(pool: &PgPool, sql: &str, patient_id: Uuid) -> i64 {
        sqlx::query_scalar(sql).bind(patient_id).fetch_one(pool).await.unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn concurrent_bookings_number_one_to_n(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;

        let mut tasks = JoinSet::new();
        for seq in 0..8 {
            let patient = add_patient(&pool, seq).await;
            let store = store.clone();
            tasks.spawn(async move { store.insert_booking(&booking(patient, doctor)).await });
        }

        let mut numbers = BTreeSet::new();
        while let Some(res) = tasks.join_next().await {
            let receipt = res.unwrap().unwrap();
            assert!(numbers.insert(receipt.queue_number), "duplicate {}", receipt.queue_number);
        }
        assert_eq!(numbers, (1..=8).collect::<BTreeSet<i32>>());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn concurrent_double_booking_is_rejected(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;
        let patient = add_patient(&pool, 1).await;

        let (s1, s2) = (store.clone(), store.clone());
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.insert_booking(&booking(patient, doctor)).await }),
            tokio::spawn(async move { s2.insert_booking(&booking(patient, doctor)).await }),
        );
        let results = [r1.unwrap(), r2.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(QueueError::DuplicateAppointment)))
        );
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM appointment WHERE patient_id = $1", patient).await,
            1
        );
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM notification WHERE patient_id = $1", patient).await,
            1
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn number_collision_rolls_back_the_booking(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;
        let patient = add_patient(&pool, 1).await;

        // number 1 taken without going through the counter
        sqlx::query(
            r#"
            INSERT INTO queue_entry (queue_number, patient_name, doctor_id, service_date)
            VALUES (1, 'walk-in', $1, $2)
            "#,
        )
        .bind(doctor)
        .bind(date())
        .execute(&pool)
        .await
        .unwrap();

        let err = store.insert_booking(&booking(patient, doctor)).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateAllocation));
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM appointment WHERE patient_id = $1", patient).await,
            0
        );
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM notification WHERE patient_id = $1", patient).await,
            0
        );

        // the counter increment was rolled back too
        let err = store.insert_booking(&booking(patient, doctor)).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateAllocation));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn stale_status_update_matches_nothing(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;
        let patient = add_patient(&pool, 1).await;

        let receipt = store.insert_booking(&booking(patient, doctor)).await.unwrap();
        let entry = store.find_entry(receipt.queue_id).await.unwrap().unwrap();
        let change = entry.stamps_for(QueueStatus::Called, Utc::now());

        let first = store
            .compare_and_set_status(entry.queue_id, QueueStatus::Waiting, &change)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, QueueStatus::Called);
        assert!(first.called_at.is_some());

        let stale = store
            .compare_and_set_status(entry.queue_id, QueueStatus::Waiting, &change)
            .await
            .unwrap();
        assert!(stale.is_none());

        // called-notification written once, next to the registration one
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM notification WHERE patient_id = $1", patient).await,
            2
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn cancel_cascades_and_rebook_gets_next_number(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;
        let patient = add_patient(&pool, 1).await;

        let first = store.insert_booking(&booking(patient, doctor)).await.unwrap();
        let entry = store.find_entry(first.queue_id).await.unwrap().unwrap();
        let change = entry.stamps_for(QueueStatus::Cancelled, Utc::now());
        store
            .compare_and_set_status(entry.queue_id, QueueStatus::Waiting, &change)
            .await
            .unwrap()
            .unwrap();

        let status: AppointmentStatus =
            sqlx::query_scalar(r#"SELECT status FROM appointment WHERE appointment_id = $1"#)
                .bind(first.appointment_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, AppointmentStatus::Cancelled);

        let again = store.insert_booking(&booking(patient, doctor)).await.unwrap();
        assert_eq!(again.queue_number, 2);
        assert_ne!(again.appointment_id, first.appointment_id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn completion_cascades_to_appointment(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;
        let patient = add_patient(&pool, 1).await;

        let receipt = store.insert_booking(&booking(patient, doctor)).await.unwrap();
        let entry = store.find_entry(receipt.queue_id).await.unwrap().unwrap();
        let change = entry.stamps_for(QueueStatus::Completed, Utc::now());
        let done = store
            .compare_and_set_status(entry.queue_id, QueueStatus::Waiting, &change)
            .await
            .unwrap()
            .unwrap();
        assert!(done.called_at.is_some() && done.completed_at.is_some());

        let status: AppointmentStatus =
            sqlx::query_scalar(r#"SELECT status FROM appointment WHERE appointment_id = $1"#)
                .bind(receipt.appointment_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, AppointmentStatus::Completed);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn walk_ins_share_the_scope_counter(pool: PgPool) {
        let store = PgQueueStore::new(pool.clone());
        let doctor = add_doctor(&pool).await;
        let patient = add_patient(&pool, 1).await;

        store.insert_booking(&booking(patient, doctor)).await.unwrap();
        let urgent = store
            .insert_walk_in(&WalkIn {
                scope: QueueScope::new(doctor, date()),
                patient_id: None,
                patient_name: "Budi".into(),
                priority: Priority::Urgent,
            })
            .await
            .unwrap();
        assert_eq!(urgent.queue_number, 2);

        let line = store
            .entries_in_scope(QueueScope::new(doctor, date()), &QueueStatus::ACTIVE)
            .await
            .unwrap();
        let order: Vec<i32> = line.iter().map(|e| e.queue_number).collect();
        assert_eq!(order, vec![2, 1]);

        let err = store
            .insert_walk_in(&WalkIn {
                scope: QueueScope::new(doctor, date()),
                patient_id: Some(Uuid::new_v4()),
                patient_name: "ghost".into(),
                priority: Priority::Normal,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PatientNotFound(_)));
    }
}
