// src/routes/medical_record_routes.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/medical_records", post(create_medical_record))
        .route("/medical_records/{medical_record_id}", patch(patch_medical_record))
        .route("/patients/{patient_id}/medical_records", get(list_patient_records))
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn check_cost(cost_cents: Option<i64>) -> Result<(), ApiError> {
    match cost_cents {
        Some(c) if c < 0 => Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "cost_cents must not be negative".into(),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MedicalRecordDto {
    pub medical_record_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: Option<String>,
    pub specialization: Option<String>,
    pub record_date: NaiveDate,
    pub complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub examination_result: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub notes: Option<String>,
    pub cost_cents: i64,
    pub created_at: DateTime<Utc>,
}

const RECORD_SELECT: &str = r#"
    SELECT
      m.medical_record_id,
      m.patient_id,
      m.patient_name,
      m.doctor_id,
      d.full_name AS doctor_name,
      d.specialization,
      m.record_date,
      m.complaint,
      m.diagnosis,
      m.examination_result,
      m.treatment,
      m.prescription,
      m.notes,
      m.cost_cents,
      m.created_at
    FROM medical_record m
    LEFT JOIN doctor d ON d.doctor_id = m.doctor_id
"#;

async fn load_record(state: &AppState, medical_record_id: Uuid) -> Result<MedicalRecordDto, ApiError> {
    let sql = format!("{RECORD_SELECT} WHERE m.medical_record_id = $1");
    sqlx::query_as::<_, MedicalRecordDto>(&sql)
        .bind(medical_record_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "medical record not found".into()))
}

/* ============================================================
   POST /medical_records
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateMedicalRecordRequest {
    pub patient_id: Uuid,
    pub record_date: Option<NaiveDate>,
    pub complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub examination_result: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub notes: Option<String>,
    pub cost_cents: Option<i64>,
}

pub async fn create_medical_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateMedicalRecordRequest>,
) -> Result<(StatusCode, Json<ApiOk<MedicalRecordDto>>), ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    check_cost(req.cost_cents)?;

    let patient_name: String = sqlx::query_scalar(
        r#"
        SELECT full_name
        FROM patient
        WHERE patient_id = $1
        "#,
    )
    .bind(req.patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::NotFound("PATIENT_NOT_FOUND", "Patient data not found".into()))?;

    let medical_record_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO medical_record
          (patient_id, patient_name, doctor_id, record_date, complaint, diagnosis,
           examination_result, treatment, prescription, notes, cost_cents)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING medical_record_id
        "#,
    )
    .bind(req.patient_id)
    .bind(&patient_name)
    .bind(doctor_id)
    .bind(req.record_date.unwrap_or_else(|| state.today()))
    .bind(trimmed(req.complaint))
    .bind(trimmed(req.diagnosis))
    .bind(trimmed(req.examination_result))
    .bind(trimmed(req.treatment))
    .bind(trimmed(req.prescription))
    .bind(trimmed(req.notes))
    .bind(req.cost_cents.unwrap_or(0))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%medical_record_id, %doctor_id, patient_id = %req.patient_id, "medical record created");

    let dto = load_record(&state, medical_record_id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: dto })))
}

/* ============================================================
   GET /patients/{patient_id}/medical_records
   ============================================================ */

pub async fn list_patient_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<MedicalRecordDto>>>, ApiError> {
    if auth.role == Role::Patient {
        let own = auth.patient_id(&state).await?;
        if own != patient_id {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "patients can only read their own medical records".into(),
            ));
        }
    }

    let sql = format!(
        "{RECORD_SELECT} WHERE m.patient_id = $1 ORDER BY m.record_date DESC, m.created_at DESC"
    );
    let rows: Vec<MedicalRecordDto> = sqlx::query_as::<_, MedicalRecordDto>(&sql)
        .bind(patient_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   PATCH /medical_records/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PatchMedicalRecordRequest {
    pub complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub examination_result: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub notes: Option<String>,
    pub cost_cents: Option<i64>,
}

pub async fn patch_medical_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(medical_record_id): Path<Uuid>,
    Json(req): Json<PatchMedicalRecordRequest>,
) -> Result<Json<ApiOk<MedicalRecordDto>>, ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    check_cost(req.cost_cents)?;

    // only the authoring doctor matches
    let row: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE medical_record
        SET
          complaint          = COALESCE($3, complaint),
          diagnosis          = COALESCE($4, diagnosis),
          examination_result = COALESCE($5, examination_result),
          treatment          = COALESCE($6, treatment),
          prescription       = COALESCE($7, prescription),
          notes              = COALESCE($8, notes),
          cost_cents         = COALESCE($9, cost_cents)
        WHERE medical_record_id = $1
          AND doctor_id = $2
        RETURNING medical_record_id
        "#,
    )
    .bind(medical_record_id)
    .bind(doctor_id)
    .bind(trimmed(req.complaint))
    .bind(trimmed(req.diagnosis))
    .bind(trimmed(req.examination_result))
    .bind(trimmed(req.treatment))
    .bind(trimmed(req.prescription))
    .bind(trimmed(req.notes))
    .bind(req.cost_cents)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    if row.is_none() {
        return Err(ApiError::NotFound(
            "NOT_FOUND",
            "medical record not found or not yours".into(),
        ));
    }

    let dto = load_record(&state, medical_record_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_dropped() {
        assert_eq!(trimmed(Some("  flu ".into())), Some("flu".to_string()));
        assert_eq!(trimmed(Some("   ".into())), None);
        assert_eq!(trimmed(None), None);
    }

    #[test]
    fn negative_cost_rejected() {
        assert!(check_cost(Some(-1)).is_err());
        assert!(check_cost(Some(0)).is_ok());
        assert!(check_cost(None).is_ok());
    }
}
