use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    health_handler, list_urls_handler, queue_stats_handler, redirect_handler, replenish_handler,
    shorten_handler,
};
use crate::state::AppState;

pub struct App {}

impl App {
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .nest(
                "/api",
                Router::new()
                    .route("/shorten", post(shorten_handler))
                    .route("/urls", get(list_urls_handler))
                    .route("/queue/stats", get(queue_stats_handler)),
            )
            .route("/admin/replenish", post(replenish_handler))
            // Catch-all code route goes last.
            .route("/{short_code}", get(redirect_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
