// src/routes/notification_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, NotificationKind, OkData},
    queue::QueueStatus,
};

const LIST_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/{notification_id}/read", post(mark_notification_read))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct NotificationDto {
    pub notification_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub queue_status: Option<QueueStatus>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<NotificationDto>>>, ApiError> {
    let patient_id = auth.patient_id(&state).await?;

    let rows: Vec<NotificationDto> = sqlx::query_as::<_, NotificationDto>(
        r#"
        SELECT notification_id, title, body, kind, queue_status, is_read, created_at
        FROM notification
        WHERE patient_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(patient_id)
    .bind(LIST_LIMIT)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let patient_id = auth.patient_id(&state).await?;

    let res = sqlx::query(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE notification_id = $1
          AND patient_id = $2
        "#,
    )
    .bind(notification_id)
    .bind(patient_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "notification not found".into()));
    }

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}
