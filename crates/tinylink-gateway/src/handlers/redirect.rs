use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tinylink_core::ShortCode;

pub async fn redirect_handler(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
) -> Result<Response> {
    let code = ShortCode::new(short_code)?;

    match state.redirector.resolve(&code).await? {
        Some(record) => Ok((
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, record.original_url)],
        )
            .into_response()),
        None => Err(AppError::NotFound(code.into_inner())),
    }
}
