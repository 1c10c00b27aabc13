//! Admin API authentication
//!
//! HTTP Basic against the single admin identity loaded from the environment
//! at startup.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::config::AdminConfig;
use crate::error::{Result, RotaError};

/// Admin credential check
#[derive(Clone)]
pub struct AdminAuth {
    username: String,
    password: String,
}

impl AdminAuth {
    pub fn new(config: &AdminConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    /// Validate the Authorization header
    pub fn validate(&self, headers: &HeaderMap) -> Result<()> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .ok_or(RotaError::AuthenticationFailed)?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| RotaError::AuthenticationFailed)?;

        // Parse "Basic <base64>"
        let encoded = auth_str
            .strip_prefix("Basic ")
            .ok_or(RotaError::AuthenticationFailed)?;

        let decoded = BASE64
            .decode(encoded)
            .map_err(|_| RotaError::AuthenticationFailed)?;

        let credentials =
            String::from_utf8(decoded).map_err(|_| RotaError::AuthenticationFailed)?;

        let (user, pass) = credentials
            .split_once(':')
            .ok_or(RotaError::AuthenticationFailed)?;

        if user == self.username && pass == self.password {
            debug!("Admin authentication successful for user: {}", user);
            Ok(())
        } else {
            warn!("Admin authentication failed for user: {}", user);
            Err(RotaError::AuthenticationFailed)
        }
    }
}

/// Middleware guarding the `/api/v1` routes
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match state.admin.validate(req.headers()) {
        Ok(()) => next.run(req).await,
        Err(_) => challenge_response(),
    }
}

/// 401 with a Basic challenge
fn challenge_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"rota\"")],
        Json(json!({ "error": "Authentication failed" })),
    )
        .into_response()
}
