use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub session_token_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    role: Role,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.role
                FROM session_token st
                JOIN app_user u ON u.user_id = st.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            // best-effort
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            Ok(AuthContext {
                user_id: row.user_id,
                role: row.role,
                session_token_id: row.session_token_id,
            })
        }
    }
}

impl AuthContext {
    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }

    pub fn ensure_role(&self, allowed: &[Role], what: &str) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                format!("{} cannot {what}", self.role.as_str()),
            ))
        }
    }

    /// `doctor_id` linked to this doctor account.
    pub async fn doctor_id(&self, state: &AppState) -> Result<Uuid, ApiError> {
        self.ensure_role(&[Role::Doctor], "act as a doctor")?;

        let doctor_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT doctor_id
            FROM doctor
            WHERE user_id = $1
            "#,
        )
        .bind(self.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;

        doctor_id.ok_or_else(|| {
            ApiError::BadRequest("NO_DOCTOR_PROFILE", "Doctor account has no doctor profile".into())
        })
    }

    /// `patient_id` linked to this patient account.
    pub async fn patient_id(&self, state: &AppState) -> Result<Uuid, ApiError> {
        self.ensure_role(&[Role::Patient], "act as a patient")?;

        let patient_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT patient_id
            FROM patient
            WHERE user_id = $1
            "#,
        )
        .bind(self.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;

        patient_id.ok_or_else(|| {
            ApiError::NotFound("PATIENT_NOT_FOUND", "Patient data not found".into())
        })
    }
}
