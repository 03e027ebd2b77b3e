use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::queue::QueueError;
use crate::validation::ValidationError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    /// Transport failures become 503; anything else is a 500.
    pub fn db(e: sqlx::Error) -> Self {
        match QueueError::from(e) {
            QueueError::StoreUnavailable(msg) => ApiError::Unavailable(msg),
            other => ApiError::Internal(format!("db error: {other}")),
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthorized(code, msg)
            | ApiError::Forbidden(code, msg)
            | ApiError::BadRequest(code, msg)
            | ApiError::NotFound(code, msg)
            | ApiError::Conflict(code, msg) => {
                (status, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Unavailable(msg) => {
                tracing::warn!("store unavailable: {msg}");
                (
                    status,
                    ApiError::to_error_response("STORE_UNAVAILABLE", "Service temporarily unavailable, please retry"),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (status, ApiError::to_error_response("INTERNAL", &msg)).into_response()
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        let msg = e.to_string();
        match e {
            QueueError::PatientNotFound(_) => ApiError::NotFound("PATIENT_NOT_FOUND", msg),
            QueueError::DoctorNotFound(_) => ApiError::NotFound("DOCTOR_NOT_FOUND", msg),
            QueueError::QueueEntryNotFound(_) => ApiError::NotFound("QUEUE_ENTRY_NOT_FOUND", msg),
            QueueError::AppointmentNotFound(_) => ApiError::NotFound("APPOINTMENT_NOT_FOUND", msg),
            QueueError::DuplicateAppointment => ApiError::Conflict("DUPLICATE_APPOINTMENT", msg),
            QueueError::DuplicateAllocation => ApiError::Conflict("DUPLICATE_ALLOCATION", msg),
            QueueError::InvalidTransition { .. } => ApiError::BadRequest("INVALID_TRANSITION", msg),
            QueueError::Forbidden(_) => ApiError::Forbidden("FORBIDDEN", msg),
            QueueError::Conflict(_) => ApiError::Conflict("CONFLICT", msg),
            QueueError::StoreUnavailable(_) => ApiError::Unavailable(msg),
            QueueError::Store(_) => ApiError::Internal(msg),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", e.to_string())
    }
}
