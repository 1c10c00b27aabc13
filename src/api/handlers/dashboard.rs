//! Dashboard statistics handlers

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;
use crate::error::RotaError;
use crate::repository::DashboardRepository;

/// Aggregate counters
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, RotaError> {
    let repo = DashboardRepository::new(state.db.pool().clone());
    let stats = repo.get_stats().await?;
    Ok(Json(stats))
}
