//! Rotation settings handlers

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RotaError;
use crate::models::RotationSettings;
use crate::repository::SettingsRepository;

/// Read rotation settings
pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, RotaError> {
    let repo = SettingsRepository::new(state.db.pool().clone());
    let mut settings = repo.get_rotation().await?;
    settings.canonicalize();
    Ok(Json(settings))
}

/// Write rotation settings.
///
/// Validation happens here, at write time; the settings watcher applies the
/// change to the running selector on its next poll.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(mut settings): Json<RotationSettings>,
) -> Result<impl IntoResponse, RotaError> {
    settings.canonicalize();
    settings.validate()?;

    let repo = SettingsRepository::new(state.db.pool().clone());
    repo.set_rotation(&settings).await?;

    info!(method = %settings.method, "Rotation settings updated");

    Ok(Json(settings))
}
