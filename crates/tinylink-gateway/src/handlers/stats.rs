use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use tinylink_redirector::BatcherStats;

pub async fn queue_stats_handler(State(state): State<AppState>) -> Json<BatcherStats> {
    Json(state.redirector.stats())
}
