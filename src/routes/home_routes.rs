use axum::{Json, Router, extract::State, routing::get};
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, Role};
use crate::queue::{AppointmentStatus, QueueScope, QueueStatus};

#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum HomeData {
    Patient {
        today: NaiveDate,
        upcoming_appointments: i64,
        unread_notifications: i64,
    },
    Doctor {
        today: NaiveDate,
        currently_serving: Option<i32>,
        by_status: Vec<StatusCount>,
    },
    Admin {
        today: NaiveDate,
        active_doctors: i64,
        queue_entries_today: i64,
    },
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: QueueStatus,
    pub total: i64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

pub async fn home(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<HomeData>>, ApiError> {
    let today = state.today();

    let data = match auth.role {
        Role::Patient => {
            let patient_id = auth.patient_id(&state).await?;
            let (upcoming_appointments, unread_notifications) = sqlx::query_as::<_, (i64, i64)>(
                r#"
                SELECT
                  (SELECT COUNT(*) FROM appointment
                    WHERE patient_id = $1 AND service_date >= $2 AND status = $3),
                  (SELECT COUNT(*) FROM notification
                    WHERE patient_id = $1 AND is_read = false)
                "#,
            )
            .bind(patient_id)
            .bind(today)
            .bind(AppointmentStatus::Confirmed)
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?;

            HomeData::Patient {
                today,
                upcoming_appointments,
                unread_notifications,
            }
        }
        Role::Doctor => {
            let doctor_id = auth.doctor_id(&state).await?;
            let by_status: Vec<StatusCount> = sqlx::query_as::<_, StatusCount>(
                r#"
                SELECT status, COUNT(*) AS total
                FROM queue_entry
                WHERE doctor_id = $1
                  AND service_date = $2
                GROUP BY status
                ORDER BY status
                "#,
            )
            .bind(doctor_id)
            .bind(today)
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::db)?;

            let currently_serving = state
                .queue
                .currently_serving(QueueScope::new(doctor_id, today))
                .await?;

            HomeData::Doctor {
                today,
                currently_serving,
                by_status,
            }
        }
        Role::Admin => {
            let (active_doctors, queue_entries_today) = sqlx::query_as::<_, (i64, i64)>(
                r#"
                SELECT
                  (SELECT COUNT(*) FROM doctor WHERE is_active = true),
                  (SELECT COUNT(*) FROM queue_entry WHERE service_date = $1)
                "#,
            )
            .bind(today)
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?;

            HomeData::Admin {
                today,
                active_doctors,
                queue_entries_today,
            }
        }
    };

    Ok(Json(ApiOk { data }))
}
