//! Proxy inventory handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RotaError;
use crate::models::{CreateProxyRequest, ProxyListParams};
use crate::proxy::rotation::ProxySelector;
use crate::repository::ProxyRepository;

/// List proxies with aggregate stats
pub async fn list_proxies(
    State(state): State<AppState>,
    Query(params): Query<ProxyListParams>,
) -> Result<impl IntoResponse, RotaError> {
    let repo = ProxyRepository::new(state.db.pool().clone());
    let response = repo.list(&params).await?;
    Ok(Json(response))
}

/// Insert a proxy
pub async fn create_proxy(
    State(state): State<AppState>,
    Json(req): Json<CreateProxyRequest>,
) -> Result<impl IntoResponse, RotaError> {
    req.validate()?;

    let repo = ProxyRepository::new(state.db.pool().clone());
    let proxy = repo.create(&req).await?;

    // Refresh the selector with the grown pool
    let proxies = repo.list_active().await?;
    state.selector.refresh(proxies).await?;

    info!(id = proxy.id, address = %proxy.address, "Created proxy");

    Ok((StatusCode::CREATED, Json(proxy)))
}

/// Remove a proxy
pub async fn delete_proxy(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, RotaError> {
    let repo = ProxyRepository::new(state.db.pool().clone());

    let deleted = repo.delete(id).await?;

    if deleted {
        let proxies = repo.list_active().await?;
        state.selector.refresh(proxies).await?;

        info!(id = id, "Deleted proxy");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RotaError::ProxyNotFound { id })
    }
}
