use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One dispatch attempt, written exactly once when the attempt ends.
///
/// `status_code` is None when the upstream was unreachable (or the client
/// vanished before a response line arrived). `success` is true only for
/// responses in the 200-399 range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub proxy_id: i32,
    pub proxy_address: String,
    pub method: String,
    pub url: String,
    pub status_code: Option<i32>,
    pub success: bool,
    pub response_time: i32,
    pub timestamp: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(
        proxy_id: i32,
        proxy_address: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        status_code: Option<i32>,
        success: bool,
        response_time: i32,
    ) -> Self {
        Self {
            proxy_id,
            proxy_address: proxy_address.into(),
            method: method.into(),
            url: url.into(),
            status_code,
            success,
            response_time,
            timestamp: Utc::now(),
        }
    }
}

/// Stored request row, as read back for the admin API
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProxyRequest {
    pub id: i64,
    pub proxy_id: i32,
    pub proxy_address: String,
    pub method: String,
    pub url: String,
    pub status_code: Option<i32>,
    pub success: bool,
    pub response_time: i32,
    pub timestamp: DateTime<Utc>,
}

/// Request list query parameters
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequestListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub proxy_id: Option<i32>,
    pub success: Option<bool>,
}
