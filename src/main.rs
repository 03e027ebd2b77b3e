mod auth;
mod config;
mod middleware;
mod validation;

mod db;
mod error;
mod models;
mod queue;
mod routes;

use std::sync::Arc;

use crate::{
    config::{clinic_offset, Config},
    models::AppState,
    queue::{pg_store::PgQueueStore, QueueService},
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    let state = AppState {
        queue: QueueService::new(Arc::new(PgQueueStore::new(pool.clone()))),
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        clinic_offset: clinic_offset(cfg.clinic_utc_offset_minutes)?,
    };

    // browser clients send a preflight before authenticated POSTs
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(
        clinic_utc_offset_minutes = cfg.clinic_utc_offset_minutes,
        "Listening on http://{}",
        cfg.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
