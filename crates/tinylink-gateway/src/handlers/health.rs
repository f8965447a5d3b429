use crate::model::HealthResponse;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::warn;

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.shortener.pool_size().await {
        Ok(pool_size) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                pool_size: Some(pool_size),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not read pool size");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    pool_size: None,
                }),
            )
        }
    }
}
