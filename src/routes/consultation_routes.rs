// src/routes/consultation_routes.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, MessageSender, MessageStatus},
};

const MAX_MESSAGE_CHARS: usize = 2000;

pub fn router() -> Router<AppState> {
    Router::new()
        // patient side
        .route("/consultations", get(list_my_messages).post(send_to_doctor))
        .route("/consultations/{doctor_id}/messages", get(patient_thread))
        // doctor side
        .route(
            "/doctor/consultations",
            get(list_doctor_conversations).post(reply_to_patient),
        )
        .route("/doctor/consultations/{patient_id}/messages", get(doctor_thread))
}

fn clean_body(raw: &str) -> Result<String, ApiError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(ApiError::BadRequest("VALIDATION_ERROR", "message is required".into()));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("message must be at most {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    Ok(body.to_string())
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MessageDto {
    pub message_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: Option<String>,
    pub body: String,
    pub sender: MessageSender,
    pub status: MessageStatus,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

const MESSAGE_SELECT: &str = r#"
    SELECT
      c.message_id,
      c.patient_id,
      c.patient_name,
      c.doctor_id,
      d.full_name AS doctor_name,
      c.body,
      c.sender,
      c.status,
      c.sent_at,
      c.read_at
    FROM consultation_message c
    LEFT JOIN doctor d ON d.doctor_id = c.doctor_id
"#;

async fn insert_message(
    state: &AppState,
    patient_id: Uuid,
    doctor_id: Uuid,
    body: &str,
    sender: MessageSender,
) -> Result<MessageDto, ApiError> {
    let patient_name: String = sqlx::query_scalar(
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
    .ok_or_else(|| ApiError::NotFound("PATIENT_NOT_FOUND", "Patient data not found".into()))?;

    let doctor_exists: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT doctor_id
        FROM doctor
        WHERE doctor_id = $1
          AND is_active = true
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;
    if doctor_exists.is_none() {
        return Err(ApiError::NotFound("DOCTOR_NOT_FOUND", "doctor not found".into()));
    }

    let message_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO consultation_message
          (patient_id, patient_name, doctor_id, body, sender, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING message_id
        "#,
    )
    .bind(patient_id)
    .bind(&patient_name)
    .bind(doctor_id)
    .bind(body)
    .bind(sender)
    .bind(MessageStatus::Sent)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%message_id, %patient_id, %doctor_id, ?sender, "consultation message sent");

    let sql = format!("{MESSAGE_SELECT} WHERE c.message_id = $1");
    sqlx::query_as::<_, MessageDto>(&sql)
        .bind(message_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)
}

async fn load_thread(
    state: &AppState,
    patient_id: Uuid,
    doctor_id: Uuid,
) -> Result<Vec<MessageDto>, ApiError> {
    let sql = format!(
        "{MESSAGE_SELECT} WHERE c.patient_id = $1 AND c.doctor_id = $2 ORDER BY c.sent_at ASC"
    );
    sqlx::query_as::<_, MessageDto>(&sql)
        .bind(patient_id)
        .bind(doctor_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)
}

/// Marks everything `from` sent in the thread as read.
async fn mark_read(
    state: &AppState,
    patient_id: Uuid,
    doctor_id: Uuid,
    from: MessageSender,
) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE consultation_message
        SET status = $4, read_at = now()
        WHERE patient_id = $1
          AND doctor_id = $2
          AND sender = $3
          AND status <> $4
        "#,
    )
    .bind(patient_id)
    .bind(doctor_id)
    .bind(from)
    .bind(MessageStatus::Read)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;
    Ok(res.rows_affected())
}

/* ============================================================
   Patient side
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SendToDoctorRequest {
    pub doctor_id: Uuid,
    pub message: String,
}

pub async fn send_to_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SendToDoctorRequest>,
) -> Result<(StatusCode, Json<ApiOk<MessageDto>>), ApiError> {
    let patient_id = auth.patient_id(&state).await?;
    let body = clean_body(&req.message)?;
    let msg = insert_message(&state, patient_id, req.doctor_id, &body, MessageSender::Patient).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: msg })))
}

pub async fn list_my_messages(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<MessageDto>>>, ApiError> {
    let patient_id = auth.patient_id(&state).await?;

    let sql = format!("{MESSAGE_SELECT} WHERE c.patient_id = $1 ORDER BY c.sent_at DESC");
    let rows: Vec<MessageDto> = sqlx::query_as::<_, MessageDto>(&sql)
        .bind(patient_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn patient_thread(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<MessageDto>>>, ApiError> {
    let patient_id = auth.patient_id(&state).await?;
    let thread = load_thread(&state, patient_id, doctor_id).await?;
    mark_read(&state, patient_id, doctor_id, MessageSender::Doctor).await?;
    Ok(Json(ApiOk { data: thread }))
}

/* ============================================================
   Doctor side
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ConversationSummary {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub last_message: String,
    pub last_sent_at: DateTime<Utc>,
    pub message_count: i64,
    pub unread_count: i64,
}

pub async fn list_doctor_conversations(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ConversationSummary>>>, ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;

    let rows: Vec<ConversationSummary> = sqlx::query_as::<_, ConversationSummary>(
        r#"
        SELECT
          c.patient_id,
          (ARRAY_AGG(c.patient_name ORDER BY c.sent_at DESC))[1] AS patient_name,
          (ARRAY_AGG(c.body ORDER BY c.sent_at DESC))[1] AS last_message,
          MAX(c.sent_at) AS last_sent_at,
          COUNT(*) AS message_count,
          COUNT(*) FILTER (WHERE c.sender = $2 AND c.status = $3) AS unread_count
        FROM consultation_message c
        WHERE c.doctor_id = $1
        GROUP BY c.patient_id
        ORDER BY last_sent_at DESC
        "#,
    )
    .bind(doctor_id)
    .bind(MessageSender::Patient)
    .bind(MessageStatus::Sent)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn doctor_thread(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<MessageDto>>>, ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    let thread = load_thread(&state, patient_id, doctor_id).await?;
    let read = mark_read(&state, patient_id, doctor_id, MessageSender::Patient).await?;
    tracing::debug!(%doctor_id, %patient_id, read, "patient messages marked read");
    Ok(Json(ApiOk { data: thread }))
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub patient_id: Uuid,
    pub message: String,
}

pub async fn reply_to_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ReplyRequest>,
) -> Result<(StatusCode, Json<ApiOk<MessageDto>>), ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    let body = clean_body(&req.message)?;
    let msg = insert_message(&state, req.patient_id, doctor_id, &body, MessageSender::Doctor).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: msg })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_rules() {
        assert_eq!(clean_body("  halo dok ").unwrap(), "halo dok");
        assert!(clean_body("   ").is_err());
        assert!(clean_body(&"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(clean_body(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
    }

    #[test]
    fn sender_and_status_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&MessageSender::Doctor).unwrap(), "\"doctor\"");
        assert_eq!(serde_json::to_string(&MessageStatus::Read).unwrap(), "\"read\"");
    }
}
