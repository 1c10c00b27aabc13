use serde::{Deserialize, Serialize};

/// Aggregate counters for the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardStats {
    /// Number of active proxies
    pub active_proxies: i64,
    /// Number of unhealthy proxies
    pub unhealthy_proxies: i64,
    /// Total number of proxies
    pub total_proxies: i64,
    /// Total requests processed (lifetime, from proxy counters)
    pub total_requests: i64,
    /// Requests recorded in the last hour
    pub requests_last_hour: i64,
    /// Average success rate across proxies (0-100)
    pub avg_success_rate: f64,
    /// Average response time in milliseconds
    pub avg_response_time: i32,
}
