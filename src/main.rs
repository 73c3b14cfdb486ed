mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod meeting;
mod models;
mod payhere;
mod routes;

use std::sync::Arc;

use crate::{config::Config, meeting::GoogleCalendarClient, models::AppState};

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
    let pool = db::connect_pg(&cfg.database_url).await?;
    if cfg.run_migrations {
        db::run_migrations(&pool).await?;
    }

    if cfg.payhere.credentials().is_none() {
        tracing::warn!("PAYHERE_MERCHANT_ID/PAYHERE_MERCHANT_SECRET not set; paid bookings will fail");
    }

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        app_base_url: cfg.app_base_url.clone(),
        default_session_minutes: cfg.default_session_minutes,
        payhere: cfg.payhere.clone(),
        meetings: Arc::new(GoogleCalendarClient::new(cfg.calendar_api_url.clone())),
    };

    // browser frontend is served from another origin
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

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
