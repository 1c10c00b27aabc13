use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Rota application
#[derive(Error, Debug)]
pub enum RotaError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Selector errors surfaced to the dispatcher
    #[error("No upstream proxies available")]
    NoUpstreams,

    #[error("All upstream proxies are at their rate limit")]
    AllAtLimit,

    #[error("Upstream usage counts unavailable")]
    UsageUnavailable,

    // Attempt errors
    #[error("Upstream connect failed: {0}")]
    UpstreamConnect(String),

    #[error("Upstream attempt timed out")]
    UpstreamTimeout,

    #[error("Client cancelled the request")]
    ClientCancelled,

    #[error("All upstreams exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    // Inventory errors
    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Authentication
    #[error("Authentication failed")]
    AuthenticationFailed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid rotation settings: {0}")]
    InvalidSettings(String),

    #[error("Settings not found: {key}")]
    SettingsNotFound { key: String },

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Rota operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RotaError::InvalidRequest(_)
            | RotaError::InvalidProxyAddress(_)
            | RotaError::UnsupportedProtocol(_)
            | RotaError::InvalidSettings(_)
            | RotaError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            RotaError::AuthenticationFailed => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            RotaError::ProxyNotFound { .. }
            | RotaError::SettingsNotFound { .. }
            | RotaError::NotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            RotaError::UpstreamConnect(_) | RotaError::Exhausted { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RotaError::NoUpstreams
            | RotaError::AllAtLimit
            | RotaError::UsageUnavailable
            | RotaError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            RotaError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,

            // Nothing is ever sent to a vanished client; pick the closest code
            RotaError::ClientCancelled => StatusCode::BAD_REQUEST,

            // 500 Internal Server Error
            RotaError::Database(_)
            | RotaError::Io(_)
            | RotaError::Http(_)
            | RotaError::MissingEnvVar(_)
            | RotaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RotaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for RotaError {
    fn from(err: hyper::Error) -> Self {
        RotaError::Http(err.to_string())
    }
}
