use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain;
use crate::models::records::{Role, TrustEvent, TrustSnapshot};
use crate::models::{
    EligibilityContext, EligibilityDecision, IngestResponse, LifecycleNotification,
    TrustStatusResponse,
};

fn parse_role(raw: &str) -> ApiResult<Role> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown role: {}", raw)))
}

/// POST /internal/trust/events: ingest one lifecycle notification from the
/// booking/job subsystem.
#[tracing::instrument(skip(state, notification), fields(
    subject_id = %notification.subject_id,
    raw_kind = %notification.raw_kind,
))]
pub async fn ingest_event_handler(
    State(state): State<AppState>,
    Json(notification): Json<LifecycleNotification>,
) -> ApiResult<Json<IngestResponse>> {
    info!("Processing lifecycle notification");

    let response =
        domain::record_lifecycle_event(&state.pool, &state.policy, &notification).await;

    match response {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            // A trust-relevant event must never be silently dropped.
            error!(error = %e, "Lifecycle event ingestion failed");
            Err(e.into())
        }
    }
}

/// GET /trust/{role}/{subject_id}/status
pub async fn trust_status_handler(
    Path((role, subject_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<TrustStatusResponse>> {
    let role = parse_role(&role)?;
    let status = domain::trust_status(&state.pool, &state.policy, &subject_id, role).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct EligibilityParams {
    pub context: String,
}

/// GET /trust/{role}/{subject_id}/eligibility?context=...
pub async fn eligibility_handler(
    Path((role, subject_id)): Path<(String, String)>,
    Query(params): Query<EligibilityParams>,
    State(state): State<AppState>,
) -> ApiResult<Json<EligibilityDecision>> {
    let role = parse_role(&role)?;
    let context: EligibilityContext = params
        .context
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown context: {}", params.context)))?;

    let decision =
        domain::check_eligibility(&state.pool, &state.policy, &subject_id, role, context).await;
    Ok(Json(decision))
}

/// GET /internal/trust/{role}/{subject_id}/events, the full ledger for
/// dispute review, excluded rows included.
pub async fn event_history_handler(
    Path((role, subject_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TrustEvent>>> {
    let role = parse_role(&role)?;
    let events = domain::get_event_history(&state.pool, &subject_id, role).await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotParams {
    #[serde(default = "default_snapshot_limit")]
    pub limit: i64,
}

fn default_snapshot_limit() -> i64 {
    50
}

/// GET /internal/trust/{role}/{subject_id}/snapshots
pub async fn snapshots_handler(
    Path((role, subject_id)): Path<(String, String)>,
    Query(params): Query<SnapshotParams>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TrustSnapshot>>> {
    let role = parse_role(&role)?;
    let snapshots =
        domain::get_snapshots(&state.pool, &subject_id, role, params.limit.clamp(1, 500)).await?;
    Ok(Json(snapshots))
}
