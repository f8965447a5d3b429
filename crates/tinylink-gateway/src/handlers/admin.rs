use crate::error::Result;
use crate::model::ReplenishResponse;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tinylink_core::ReplenishOutcome;
use tracing::info;

/// Fills the code pool up to its target on demand.
pub async fn replenish_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ReplenishResponse>)> {
    let outcome = state.shortener.replenish().await?;
    info!(inserted = outcome.inserted(), "manual replenish finished");

    let status = match &outcome {
        ReplenishOutcome::Completed { .. } => StatusCode::OK,
        ReplenishOutcome::AlreadyRunning => StatusCode::CONFLICT,
        ReplenishOutcome::Interrupted { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };

    Ok((status, Json(outcome.into())))
}
