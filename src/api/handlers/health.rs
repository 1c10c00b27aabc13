//! Health check endpoint

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use parking_lot::RwLock;
use serde_json::json;
use tokio::time::timeout;

use crate::api::server::AppState;

/// Tracks when the database last answered a ping.
///
/// The process reports healthy through short database hiccups; only an
/// outage longer than the grace period turns `/health` into a 503.
pub struct DbHealth {
    last_ok: RwLock<Instant>,
    grace: Duration,
}

impl DbHealth {
    pub fn new(grace: Duration) -> Self {
        Self {
            last_ok: RwLock::new(Instant::now()),
            grace,
        }
    }

    pub fn mark_ok(&self) {
        *self.last_ok.write() = Instant::now();
    }

    pub fn within_grace(&self) -> bool {
        self.last_ok.read().elapsed() <= self.grace
    }
}

impl Default for DbHealth {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Health check: 200 while the process is up and the database has answered
/// within the grace period, 503 otherwise
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ping = timeout(Duration::from_secs(2), state.db.health_check()).await;

    match ping {
        Ok(Ok(latency)) => {
            state.db_health.mark_ok();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "healthy",
                    "database": "up",
                    "db_latency_ms": latency.as_millis() as u64,
                    "uptime": state.started_at.elapsed().as_secs(),
                })),
            )
        }
        _ => {
            if state.db_health.within_grace() {
                (
                    StatusCode::OK,
                    Json(json!({
                        "status": "degraded",
                        "database": "unreachable",
                        "uptime": state.started_at.elapsed().as_secs(),
                    })),
                )
            } else {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "status": "unhealthy",
                        "database": "unreachable",
                        "uptime": state.started_at.elapsed().as_secs(),
                    })),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_health_grace_window() {
        let health = DbHealth::new(Duration::from_secs(30));
        assert!(health.within_grace());

        let health = DbHealth::new(Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!health.within_grace());

        health.mark_ok();
        // A zero grace expires immediately after any delay; mark_ok resets
        // the clock so the check right here still sees a recent ping
        assert!(health.last_ok.read().elapsed() < Duration::from_secs(1));
    }
}
