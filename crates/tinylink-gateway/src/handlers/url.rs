use crate::error::Result;
use crate::model::{ListUrlsQuery, ListUrlsResponse, ShortenRequest, ShortenResponse, UrlEntry};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use tinylink_core::{ReplenishOutcome, ShortenerError};
use tracing::{info, warn};

const DEFAULT_LIST_LIMIT: usize = 1_000;

/// Shortens `long_url`.
///
/// An empty pool triggers one synchronous replenish and a single retry
/// before the request fails with 503.
pub async fn shorten_handler(
    State(state): State<AppState>,
    Json(request): Json<ShortenRequest>,
) -> Result<Json<ShortenResponse>> {
    let shortened = match state.shortener.shorten(&request.long_url).await {
        Err(ShortenerError::PoolExhausted) => {
            warn!("code pool exhausted, replenishing before retry");
            match state.shortener.replenish().await {
                Ok(ReplenishOutcome::Interrupted { error, .. }) => {
                    warn!(error = %error, "replenish before retry was interrupted")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "replenish before retry failed"),
            }
            state.shortener.shorten(&request.long_url).await?
        }
        result => result?,
    };

    if !shortened.existing {
        info!(code = %shortened.code, "created short url");
    }

    Ok(Json(ShortenResponse {
        short_url: shortened.code.to_url(&state.base_url),
        short_code: shortened.code.into_inner(),
        original_url: request.long_url,
    }))
}

/// Lists the most recently created mappings.
pub async fn list_urls_handler(
    State(state): State<AppState>,
    Query(query): Query<ListUrlsQuery>,
) -> Result<Json<ListUrlsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let urls: Vec<UrlEntry> = state
        .shortener
        .list_urls(limit)
        .await?
        .into_iter()
        .map(|(code, record)| UrlEntry {
            short_url: code.to_url(&state.base_url),
            short_code: code.into_inner(),
            original_url: record.original_url,
            created_at: record.created_at.to_string(),
            clicks: record.clicks,
        })
        .collect();

    Ok(Json(ListUrlsResponse {
        count: urls.len(),
        urls,
    }))
}
