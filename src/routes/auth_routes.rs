// src/routes/auth_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_new_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    validation::{validate_email, validate_nik, validate_phone},
};

const PATIENT_NIK_CONSTRAINT: &str = "patient_nik_key";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
}

async fn load_profile_id(state: &AppState, user_id: Uuid, role: Role) -> Result<Option<Uuid>, ApiError> {
    let sql = match role {
        Role::Doctor => r#"SELECT doctor_id FROM doctor WHERE user_id = $1"#,
        Role::Patient => r#"SELECT patient_id FROM patient WHERE user_id = $1"#,
        Role::Admin => return Ok(None),
    };

    sqlx::query_scalar(sql)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginResponseData>>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "email and password are required".into(),
        ));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, email, display_name, password_hash, role, is_active
        FROM app_user
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }

    if !verify_password(&req.password, &user.password_hash) {
        tracing::info!(user_id = %user.user_id, "login rejected: wrong password");
        return Err(ApiError::invalid_credentials());
    }

    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (user_id, session_token_hash, device_name, expires_at)
        VALUES
            ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user.user_id)
    .bind(&token_hash)
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    let profile_id = load_profile_id(&state, user.user_id, user.role).await?;
    tracing::info!(user_id = %user.user_id, role = user.role.as_str(), "login");

    Ok(Json(ApiOk {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            user: UserProfile {
                user_id: user.user_id,
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                profile_id,
            },
        },
    }))
}

/* ============================================================
   POST /auth/register  (patient self-registration)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub nik: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<i16>, // 0 male, 1 female
    pub address: Option<String>,
    pub blood_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponseData {
    pub user_id: Uuid,
    pub patient_id: Uuid,
}

/// A unique violation means the email or NIK was taken by a concurrent registration.
fn registration_error(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let field = match db.constraint() {
                Some(PATIENT_NIK_CONSTRAINT) => "nik",
                _ => "email",
            };
            return ApiError::Conflict(
                "ALREADY_REGISTERED",
                format!("{field} is already registered"),
            );
        }
    }
    ApiError::db(e)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiOk<RegisterResponseData>>), ApiError> {
    let nik = validate_nik(&req.nik)?;
    let email = validate_email(&req.email)?;
    let phone = validate_phone(req.phone.as_deref())?;
    let full_name = req.full_name.trim();
    if full_name.is_empty() {
        return Err(ApiError::BadRequest("VALIDATION_ERROR", "full_name is required".into()));
    }
    if let Some(g) = req.gender {
        if !(0..=1).contains(&g) {
            return Err(ApiError::BadRequest("VALIDATION_ERROR", "gender must be 0 or 1".into()));
        }
    }
    let password_hash = hash_new_password(&req.password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let taken: Option<String> = sqlx::query_scalar(
        r#"
        SELECT 'email' FROM app_user WHERE email = $1
        UNION ALL
        SELECT 'nik' FROM patient WHERE nik = $2
        LIMIT 1
        "#,
    )
    .bind(&email)
    .bind(&nik)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if let Some(field) = taken {
        return Err(ApiError::Conflict(
            "ALREADY_REGISTERED",
            format!("{field} is already registered"),
        ));
    }

    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO app_user (email, display_name, password_hash, role)
        VALUES ($1, $2, $3, $4)
        RETURNING user_id
        "#,
    )
    .bind(&email)
    .bind(full_name)
    .bind(&password_hash)
    .bind(Role::Patient)
    .fetch_one(&mut *tx)
    .await
    .map_err(registration_error)?;

    let patient_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO patient
          (user_id, nik, full_name, birth_date, gender, address, phone, email, blood_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING patient_id
        "#,
    )
    .bind(user_id)
    .bind(&nik)
    .bind(full_name)
    .bind(req.birth_date)
    .bind(req.gender)
    .bind(req.address.as_deref().map(str::trim))
    .bind(phone)
    .bind(&email)
    .bind(req.blood_type.as_deref().map(str::trim))
    .fetch_one(&mut *tx)
    .await
    .map_err(registration_error)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, %patient_id, "patient registered");
    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: RegisterResponseData { user_id, patient_id },
        }),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeResponseData>>, ApiError> {
    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, email, display_name, password_hash, role, is_active
        FROM app_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let profile_id = load_profile_id(&state, user.user_id, user.role).await?;

    Ok(Json(ApiOk {
        data: MeResponseData {
            user: UserProfile {
                user_id: user.user_id,
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                profile_id,
            },
            session: SessionInfo {
                session_token_id: session.session_token_id,
                expires_at: session.expires_at,
            },
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Verifies the old password, stores the new one, and revokes every other session.
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    if req.new_password != req.confirm_password {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "new_password and confirm_password do not match".into(),
        ));
    }

    let stored_hash: String = sqlx::query_scalar(
        r#"
        SELECT password_hash
        FROM app_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.old_password, &stored_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_new_password(&req.new_password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(r#"UPDATE app_user SET password_hash = $2 WHERE user_id = $1"#)
        .bind(auth.user_id)
        .bind(&new_hash)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND session_token_id <> $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}
