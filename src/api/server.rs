use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::handlers::{
    eligibility_handler, event_history_handler, ingest_event_handler, snapshots_handler,
    trust_status_handler,
};
use crate::config::TrustPolicy;
use crate::db::connection::build_pool;
use crate::domain;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub policy: Arc<TrustPolicy>,
}

pub fn init_tracing() {
    let use_json = env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn,tower=warn")),
    );

    if use_json {
        subscriber
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        subscriber.with(fmt::layer().with_target(false)).init();
    }
}

pub async fn create_app() -> Result<Router, Box<dyn std::error::Error>> {
    let database_url = env::var("DATABASE_URL")?;
    let pool = build_pool(&database_url)?;
    let policy = Arc::new(TrustPolicy::from_env()?);

    Ok(build_router(AppState { pool, policy }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Write path: lifecycle notifications from the booking/job subsystem
        .route("/internal/trust/events", post(ingest_event_handler))
        // Read path
        .route("/trust/{role}/{subject_id}/status", get(trust_status_handler))
        .route(
            "/trust/{role}/{subject_id}/eligibility",
            get(eligibility_handler),
        )
        // Admin/support tooling
        .route(
            "/internal/trust/{role}/{subject_id}/events",
            get(event_history_handler),
        )
        .route(
            "/internal/trust/{role}/{subject_id}/snapshots",
            get(snapshots_handler),
        )
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Periodic housekeeping: window-expiry recalculation and scheduled snapshots.
/// A single cooperative task, not a dedicated worker thread.
fn spawn_sweep_task(state: AppState) {
    let interval_hours = state.policy.sweep_interval_hours.max(1) as u64;

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(interval_hours * 3600));
        // The first tick fires immediately; skip straight to the schedule.
        interval.tick().await;

        loop {
            interval.tick().await;
            match domain::run_sweep(&state.pool, &state.policy).await {
                Ok(stats) => info!(
                    recalculated = stats.subjects_recalculated,
                    snapshots = stats.snapshots_written,
                    "Scheduled sweep finished"
                ),
                Err(e) => warn!(error = %e, "Scheduled sweep failed; will retry next interval"),
            }
        }
    });
}

pub async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting trust engine");

    let database_url = env::var("DATABASE_URL")?;
    let pool = build_pool(&database_url)?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let policy = Arc::new(TrustPolicy::from_env()?);
    let state = AppState { pool, policy };

    spawn_sweep_task(state.clone());

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        info!("Shutting down gracefully...");
    };

    let app = build_router(state);

    let port = env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
