//! Admin API server using Axum
//!
//! Thin REST surface consumed by the dashboard: inventory CRUD, rotation
//! settings, request records, aggregate stats.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::{ApiServerConfig, Config};
use crate::database::Database;
use crate::error::Result;
use crate::proxy::rotation::DynamicSelector;

use super::handlers::health::DbHealth;
use super::middleware::{cors_layer, AdminAuth};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub admin: AdminAuth,
    pub started_at: Instant,
    pub selector: Arc<DynamicSelector>,
    pub db_health: Arc<DbHealth>,
}

/// Admin API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        api_config: ApiServerConfig,
        full_config: Config,
        db: Database,
        selector: Arc<DynamicSelector>,
    ) -> Self {
        let admin = AdminAuth::new(&full_config.admin);

        let state = AppState {
            db,
            config: full_config,
            admin,
            started_at: Instant::now(),
            selector,
            db_health: Arc::new(DbHealth::default()),
        };

        Self {
            config: api_config,
            state,
        }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| crate::error::RotaError::InvalidConfig("Invalid API server address".into()))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| crate::error::RotaError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
