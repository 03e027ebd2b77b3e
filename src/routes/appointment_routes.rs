// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
    queue::{service::PatientQueueStatus, AppointmentStatus, Booking, QueueScope, QueueStatus},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment))
        .route("/appointments/my", get(list_my_appointments))
        .route("/appointments/{appointment_id}/queue", get(get_queue_status))
}

fn parse_time_slot(raw: &str) -> Result<NaiveTime, ApiError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| {
            ApiError::BadRequest(
                "VALIDATION_ERROR",
                "appointment_time must be HH:MM or HH:MM:SS".into(),
            )
        })
}

/* ============================================================
   POST /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub complaint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateAppointmentResponse {
    pub message: String,
    pub appointment_id: Uuid,
    pub queue_number: i32,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<CreateAppointmentResponse>>), ApiError> {
    let patient_id = auth.patient_id(&state).await?;

    let time_slot = parse_time_slot(&req.appointment_time)?;
    if req.appointment_date < state.today() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "appointment_date cannot be in the past".into(),
        ));
    }
    let complaint = req
        .complaint
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let booking = Booking {
        patient_id,
        scope: QueueScope::new(req.doctor_id, req.appointment_date),
        time_slot,
        complaint,
    };

    let receipt = state.queue.create_appointment_with_queue(&booking).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: CreateAppointmentResponse {
                message: "Your registration has been confirmed".into(),
                appointment_id: receipt.appointment_id,
                queue_number: receipt.queue_number,
            },
        }),
    ))
}

/* ============================================================
   GET /appointments/my
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MyAppointmentRow {
    pub appointment_id: Uuid,
    pub service_date: NaiveDate,
    pub time_slot: NaiveTime,
    pub complaint: Option<String>,
    pub service_type: String,
    pub status: AppointmentStatus,
    pub doctor_id: Uuid,
    pub doctor_name: Option<String>,
    pub specialization: Option<String>,
    pub queue_number: Option<i32>,
    pub queue_status: Option<QueueStatus>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<MyAppointmentRow>>>, ApiError> {
    let patient_id = auth.patient_id(&state).await?;

    let rows: Vec<MyAppointmentRow> = sqlx::query_as::<_, MyAppointmentRow>(
        r#"
        SELECT
          a.appointment_id,
          a.service_date,
          a.time_slot,
          a.complaint,
          a.service_type,
          a.status,
          a.doctor_id,
          d.full_name AS doctor_name,
          d.specialization,
          q.queue_number,
          q.status AS queue_status,
          a.created_at
        FROM appointment a
        LEFT JOIN doctor d ON d.doctor_id = a.doctor_id
        LEFT JOIN queue_entry q ON q.appointment_id = a.appointment_id
        WHERE a.patient_id = $1
        ORDER BY a.service_date DESC, a.created_at DESC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   GET /appointments/{appointment_id}/queue
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct QueueContext {
    pub doctor_name: Option<String>,
    pub specialization: Option<String>,
    pub complaint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusDto {
    #[serde(flatten)]
    pub status: PatientQueueStatus,
    #[serde(flatten)]
    pub context: QueueContext,
}

pub async fn get_queue_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<QueueStatusDto>>, ApiError> {
    let patient_id = auth.patient_id(&state).await?;

    let status = state
        .queue
        .patient_queue_status(appointment_id, patient_id)
        .await?;

    let context: QueueContext = sqlx::query_as::<_, QueueContext>(
        r#"
        SELECT
          d.full_name AS doctor_name,
          d.specialization,
          a.complaint
        FROM appointment a
        LEFT JOIN doctor d ON d.doctor_id = a.doctor_id
        WHERE a.appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: QueueStatusDto { status, context },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_slot_formats() {
        assert_eq!(
            parse_time_slot("08:30").unwrap(),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time_slot(" 13:05:09 ").unwrap(),
            NaiveTime::from_hms_opt(13, 5, 9).unwrap()
        );
        assert!(parse_time_slot("25:00").is_err());
        assert!(parse_time_slot("noon").is_err());
    }
}
