use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod consultation_routes;
pub mod doctor_routes;
pub mod home_routes;
pub mod medical_record_routes;
pub mod notification_routes;
pub mod queue_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", doctor_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", queue_routes::router())
        .nest("/api/v1", medical_record_routes::router())
        .nest("/api/v1", consultation_routes::router())
        .nest("/api/v1", notification_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}
