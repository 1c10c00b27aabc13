//! Request log handlers

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;
use crate::error::RotaError;
use crate::models::RequestListParams;
use crate::repository::RequestLogRepository;

/// Paginate recent request records, newest first
pub async fn list_requests(
    State(state): State<AppState>,
    Query(params): Query<RequestListParams>,
) -> Result<impl IntoResponse, RotaError> {
    let repo = RequestLogRepository::new(state.db.pool().clone());
    let response = repo.list(&params).await?;
    Ok(Json(response))
}
