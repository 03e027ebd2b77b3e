// src/routes/doctor_routes.rs

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData},
};

/// Practice days, stored lowercase as schedule keys.
const DAYS: [(&str, &str); 7] = [
    ("senin", "Senin"),
    ("selasa", "Selasa"),
    ("rabu", "Rabu"),
    ("kamis", "Kamis"),
    ("jumat", "Jumat"),
    ("sabtu", "Sabtu"),
    ("minggu", "Minggu"),
];

const MAX_PATIENTS_PER_SESSION: i32 = 20;

pub type PracticeSchedule = BTreeMap<String, String>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors))
        .route("/doctors/{doctor_id}/schedules", get(get_doctor_schedules))
        .route("/doctors/me/schedules", get(get_my_schedules).put(put_my_schedules))
        .route("/doctors/me/schedules/{day}", delete(delete_my_schedule_day))
}

/* ============================================================
   Schedule helpers
   ============================================================ */

/// Anything that is not a `{day: "HH:MM-HH:MM"}` object reads as empty.
fn parse_schedule(raw: &serde_json::Value) -> PracticeSchedule {
    serde_json::from_value(raw.clone()).unwrap_or_default()
}

fn canonical_day(day: &str) -> Option<&'static str> {
    let lower = day.trim().to_lowercase();
    DAYS.iter().find(|(key, _)| *key == lower).map(|(key, _)| *key)
}

fn display_day(day: &str) -> String {
    canonical_day(day)
        .and_then(|key| DAYS.iter().find(|(k, _)| *k == key))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| day.to_string())
}

fn split_range(range: &str) -> (String, String) {
    match range.split_once('-') {
        Some((start, end)) => (start.trim().to_string(), end.trim().to_string()),
        None => (range.trim().to_string(), String::new()),
    }
}

fn parse_range(range: &str) -> Result<(NaiveTime, NaiveTime), String> {
    let (start, end) = split_range(range);
    let start = NaiveTime::parse_from_str(&start, "%H:%M")
        .map_err(|_| format!("invalid start time in '{range}', expected HH:MM-HH:MM"))?;
    let end = NaiveTime::parse_from_str(&end, "%H:%M")
        .map_err(|_| format!("invalid end time in '{range}', expected HH:MM-HH:MM"))?;
    if end <= start {
        return Err(format!("'{range}' must end after it starts"));
    }
    Ok((start, end))
}

/// Validates and normalises an incoming schedule map.
fn normalize_schedule(input: PracticeSchedule) -> Result<PracticeSchedule, ApiError> {
    let mut out = PracticeSchedule::new();
    for (day, range) in input {
        let key = canonical_day(&day).ok_or_else(|| {
            ApiError::BadRequest("VALIDATION_ERROR", format!("unknown practice day '{day}'"))
        })?;
        let (start, end) =
            parse_range(&range).map_err(|msg| ApiError::BadRequest("VALIDATION_ERROR", msg))?;
        let previous = out.insert(
            key.to_string(),
            format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
        );
        if previous.is_some() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("practice day '{key}' given more than once"),
            ));
        }
    }
    Ok(out)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ScheduleRowDto {
    pub id: String,
    pub day_of_week: String,
    pub time: String,
    pub start_time: String,
    pub end_time: String,
    pub max_patients: i32,
    pub is_active: bool,
}

fn expand_schedule(schedule: &PracticeSchedule) -> Vec<ScheduleRowDto> {
    schedule
        .iter()
        .map(|(day, time)| {
            let (start_time, end_time) = split_range(time);
            ScheduleRowDto {
                id: format!("{day}-{time}"),
                day_of_week: display_day(day),
                time: time.clone(),
                start_time,
                end_time,
                max_patients: MAX_PATIENTS_PER_SESSION,
                is_active: true,
            }
        })
        .collect()
}

async fn load_schedule(state: &AppState, doctor_id: Uuid) -> Result<PracticeSchedule, ApiError> {
    let raw: Option<SqlJson<serde_json::Value>> = sqlx::query_scalar(
        r#"
        SELECT practice_schedule
        FROM doctor
        WHERE doctor_id = $1
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    let raw = raw.ok_or_else(|| ApiError::NotFound("DOCTOR_NOT_FOUND", "doctor not found".into()))?;
    Ok(parse_schedule(&raw.0))
}

async fn store_schedule(
    state: &AppState,
    doctor_id: Uuid,
    schedule: &PracticeSchedule,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE doctor
        SET practice_schedule = $2
        WHERE doctor_id = $1
        "#,
    )
    .bind(doctor_id)
    .bind(SqlJson(schedule))
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;
    Ok(())
}

/// Drops one day key in a single statement; `false` when the doctor row is missing.
async fn remove_schedule_day(db: &PgPool, doctor_id: Uuid, day: &str) -> Result<bool, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE doctor
        SET practice_schedule = practice_schedule - $2::text
        WHERE doctor_id = $1
        "#,
    )
    .bind(doctor_id)
    .bind(day)
    .execute(db)
    .await
    .map_err(ApiError::db)?;

    Ok(res.rows_affected() > 0)
}

/* ============================================================
   GET /doctors
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct DoctorRow {
    doctor_id: Uuid,
    full_name: String,
    specialization: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    practice_schedule: SqlJson<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct DoctorDto {
    pub doctor_id: Uuid,
    pub full_name: String,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub schedules: PracticeSchedule,
}

pub async fn list_doctors(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<DoctorDto>>>, ApiError> {
    let rows: Vec<DoctorRow> = sqlx::query_as::<_, DoctorRow>(
        r#"
        SELECT doctor_id, full_name, specialization, phone, email, practice_schedule
        FROM doctor
        WHERE is_active = true
        ORDER BY full_name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let data = rows
        .into_iter()
        .map(|r| DoctorDto {
            schedules: parse_schedule(&r.practice_schedule.0),
            doctor_id: r.doctor_id,
            full_name: r.full_name,
            specialization: r.specialization,
            phone: r.phone,
            email: r.email,
        })
        .collect();

    Ok(Json(ApiOk { data }))
}

/* ============================================================
   GET /doctors/{doctor_id}/schedules
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DoctorBrief {
    pub full_name: String,
    pub specialization: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoctorSchedulesDto {
    pub doctor: DoctorBrief,
    pub schedules: PracticeSchedule,
}

pub async fn get_doctor_schedules(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<DoctorSchedulesDto>>, ApiError> {
    let doctor: DoctorBrief = sqlx::query_as::<_, DoctorBrief>(
        r#"
        SELECT full_name, specialization
        FROM doctor
        WHERE doctor_id = $1
          AND is_active = true
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::NotFound("DOCTOR_NOT_FOUND", "doctor not found".into()))?;

    let schedules = load_schedule(&state, doctor_id).await?;

    Ok(Json(ApiOk {
        data: DoctorSchedulesDto { doctor, schedules },
    }))
}

/* ============================================================
   /doctors/me/schedules
   ============================================================ */

pub async fn get_my_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ScheduleRowDto>>>, ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    let schedule = load_schedule(&state, doctor_id).await?;
    Ok(Json(ApiOk {
        data: expand_schedule(&schedule),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PutSchedulesRequest {
    pub schedules: PracticeSchedule,
}

pub async fn put_my_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PutSchedulesRequest>,
) -> Result<Json<ApiOk<Vec<ScheduleRowDto>>>, ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    let schedule = normalize_schedule(req.schedules)?;

    store_schedule(&state, doctor_id, &schedule).await?;
    tracing::info!(%doctor_id, days = schedule.len(), "practice schedule replaced");

    Ok(Json(ApiOk {
        data: expand_schedule(&schedule),
    }))
}

pub async fn delete_my_schedule_day(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(day): Path<String>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let doctor_id = auth.doctor_id(&state).await?;
    let key = canonical_day(&day).ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", format!("unknown practice day '{day}'"))
    })?;

    if !remove_schedule_day(&state.db, doctor_id, key).await? {
        return Err(ApiError::NotFound("DOCTOR_NOT_FOUND", "doctor not found".into()));
    }

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_schedule_reads_empty() {
        assert!(parse_schedule(&json!("not a map")).is_empty());
        assert!(parse_schedule(&json!({"senin": 5})).is_empty());
        assert!(parse_schedule(&json!(null)).is_empty());
        assert_eq!(parse_schedule(&json!({"rabu": "08:00-14:00"})).len(), 1);
    }

    #[test]
    fn expanded_rows_use_display_names() {
        let schedule = parse_schedule(&json!({"senin": "08:00-14:00", "Jumat": "13:00 - 17:00"}));
        let rows = expand_schedule(&schedule);
        assert_eq!(rows.len(), 2);

        let jumat = rows.iter().find(|r| r.day_of_week == "Jumat").unwrap();
        assert_eq!(jumat.start_time, "13:00");
        assert_eq!(jumat.end_time, "17:00");
        assert_eq!(jumat.max_patients, 20);

        let senin = rows.iter().find(|r| r.day_of_week == "Senin").unwrap();
        assert_eq!(senin.id, "senin-08:00-14:00");
    }

    #[test]
    fn normalize_accepts_mixed_case_days() {
        let mut input = PracticeSchedule::new();
        input.insert("SENIN".into(), "8:00-14:30".into());
        let out = normalize_schedule(input).unwrap();
        assert_eq!(out.get("senin").map(String::as_str), Some("08:00-14:30"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn removing_a_day_keeps_the_others(pool: PgPool) {
        let doctor_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO doctor (full_name, practice_schedule)
            VALUES ('dr. Ahmad', '{"senin": "08:00-14:00", "rabu": "09:00-12:00"}'::jsonb)
            RETURNING doctor_id
            "#,
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert!(remove_schedule_day(&pool, doctor_id, "senin").await.unwrap());
        // absent key is a no-op
        assert!(remove_schedule_day(&pool, doctor_id, "sabtu").await.unwrap());
        assert!(!remove_schedule_day(&pool, Uuid::new_v4(), "rabu").await.unwrap());

        let raw: SqlJson<serde_json::Value> =
            sqlx::query_scalar(r#"SELECT practice_schedule FROM doctor WHERE doctor_id = $1"#)
                .bind(doctor_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        let schedule = parse_schedule(&raw.0);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.get("rabu").map(String::as_str), Some("09:00-12:00"));
    }

    #[test]
    fn normalize_rejects_bad_input() {
        let mut unknown_day = PracticeSchedule::new();
        unknown_day.insert("monday".into(), "08:00-14:00".into());
        assert!(normalize_schedule(unknown_day).is_err());

        let mut backwards = PracticeSchedule::new();
        backwards.insert("rabu".into(), "14:00-08:00".into());
        assert!(normalize_schedule(backwards).is_err());

        let mut twice = PracticeSchedule::new();
        twice.insert("senin".into(), "08:00-12:00".into());
        twice.insert("SENIN".into(), "13:00-17:00".into());
        assert!(normalize_schedule(twice).is_err());

        let mut garbage = PracticeSchedule::new();
        garbage.insert("rabu".into(), "morning".into());
        assert!(normalize_schedule(garbage).is_err());
    }
}
