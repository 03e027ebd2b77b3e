// src/routes/queue_routes.rs

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    queue::{Priority, QueueEntry, QueueScope, QueueStatus, WalkIn},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue/today", get(get_today_queue))
        .route("/queue/serving", get(get_currently_serving))
        .route("/queue/walk_in", post(register_walk_in))
        .route("/queue/{queue_id}/transition", post(transition_queue_entry))
}

/// Doctors always act on their own queue; admins name the doctor explicitly.
async fn resolve_doctor(
    state: &AppState,
    auth: &AuthContext,
    requested: Option<Uuid>,
) -> Result<Uuid, ApiError> {
    auth.ensure_role(&[Role::Doctor, Role::Admin], "view the clinic queue")?;
    if auth.is_doctor() {
        return auth.doctor_id(state).await;
    }
    requested.ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", "doctor_id is required".into())
    })
}

/* ============================================================
   GET /queue/today
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct TodayQuery {
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct QueueDetailRow {
    queue_id: Uuid,
    phone: Option<String>,
    birth_date: Option<NaiveDate>,
    gender: Option<i16>,
    address: Option<String>,
    complaint: Option<String>,
    time_slot: Option<NaiveTime>,
}

#[derive(Debug, Serialize)]
pub struct QueueLineItem {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<i16>,
    pub address: Option<String>,
    pub complaint: Option<String>,
    pub time_slot: Option<NaiveTime>,
}

#[derive(Debug, Serialize)]
pub struct TodayQueueDto {
    pub doctor_id: Uuid,
    pub service_date: NaiveDate,
    pub currently_serving: Option<i32>,
    pub entries: Vec<QueueLineItem>,
}

pub async fn get_today_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<TodayQuery>,
) -> Result<Json<ApiOk<TodayQueueDto>>, ApiError> {
    let doctor_id = resolve_doctor(&state, &auth, q.doctor_id).await?;
    let scope = QueueScope::new(doctor_id, state.today());

    let line = state.queue.next_in_line(scope).await?;
    let currently_serving = line
        .iter()
        .filter(|e| QueueStatus::SERVING.contains(&e.status))
        .map(|e| e.queue_number)
        .min();

    let ids: Vec<Uuid> = line.iter().map(|e| e.queue_id).collect();
    let details: Vec<QueueDetailRow> = sqlx::query_as::<_, QueueDetailRow>(
        r#"
        SELECT
          q.queue_id,
          p.phone,
          p.birth_date,
          p.gender,
          p.address,
          a.complaint,
          a.time_slot
        FROM queue_entry q
        LEFT JOIN patient p ON p.patient_id = q.patient_id
        LEFT JOIN appointment a ON a.appointment_id = q.appointment_id
        WHERE q.queue_id = ANY($1)
        "#,
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let mut details: HashMap<Uuid, QueueDetailRow> =
        details.into_iter().map(|d| (d.queue_id, d)).collect();

    // keep serving order from the service
    let entries = line
        .into_iter()
        .map(|entry| {
            let d = details.remove(&entry.queue_id);
            let (phone, birth_date, gender, address, complaint, time_slot) = match d {
                Some(d) => (d.phone, d.birth_date, d.gender, d.address, d.complaint, d.time_slot),
                None => (None, None, None, None, None, None),
            };
            QueueLineItem {
                entry,
                phone,
                birth_date,
                gender,
                address,
                complaint,
                time_slot,
            }
        })
        .collect();

    Ok(Json(ApiOk {
        data: TodayQueueDto {
            doctor_id,
            service_date: scope.service_date,
            currently_serving,
            entries,
        },
    }))
}

/* ============================================================
   GET /queue/serving?doctor_id&date
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ServingQuery {
    pub doctor_id: Uuid,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ServingDto {
    pub doctor_id: Uuid,
    pub service_date: NaiveDate,
    pub currently_serving: Option<i32>,
}

pub async fn get_currently_serving(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ServingQuery>,
) -> Result<Json<ApiOk<ServingDto>>, ApiError> {
    let scope = QueueScope::new(q.doctor_id, q.date.unwrap_or_else(|| state.today()));
    let currently_serving = state.queue.currently_serving(scope).await?;

    Ok(Json(ApiOk {
        data: ServingDto {
            doctor_id: scope.doctor_id,
            service_date: scope.service_date,
            currently_serving,
        },
    }))
}

/* ============================================================
   POST /queue/walk_in
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct WalkInRequest {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

pub async fn register_walk_in(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<WalkInRequest>,
) -> Result<(StatusCode, Json<ApiOk<QueueEntry>>), ApiError> {
    let doctor_id = resolve_doctor(&state, &auth, req.doctor_id).await?;

    let given_name = req
        .patient_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let patient_name = match (req.patient_id, given_name) {
        (_, Some(name)) => name,
        (Some(patient_id), None) => sqlx::query_scalar::<_, String>(
            r#"
            SELECT full_name
            FROM patient
            WHERE patient_id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("PATIENT_NOT_FOUND", "Patient data not found".into()))?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "patient_id or patient_name is required".into(),
            ));
        }
    };

    let walk_in = WalkIn {
        scope: QueueScope::new(doctor_id, state.today()),
        patient_id: req.patient_id,
        patient_name,
        priority: req.priority,
    };

    let entry = state.queue.allocate_queue_number(&walk_in).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: entry })))
}

/* ============================================================
   POST /queue/{queue_id}/transition
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: QueueStatus,
}

pub async fn transition_queue_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<ApiOk<QueueEntry>>, ApiError> {
    if auth.is_doctor() {
        let own_doctor_id = auth.doctor_id(&state).await?;
        let entry_doctor_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT doctor_id
            FROM queue_entry
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;

        if entry_doctor_id.is_some_and(|id| id != own_doctor_id) {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "doctors can only manage their own queue".into(),
            ));
        }
    }

    let entry = state
        .queue
        .transition_status(queue_id, req.status, auth.role)
        .await?;

    Ok(Json(ApiOk { data: entry }))
}
