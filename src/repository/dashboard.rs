use crate::error::Result;
use crate::models::DashboardStats;
use sqlx::PgPool;

/// Repository for dashboard statistics
#[derive(Clone)]
pub struct DashboardRepository {
    pool: PgPool,
}

impl DashboardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Aggregate counters across the inventory and the request log
    pub async fn get_stats(&self) -> Result<DashboardStats> {
        let (total_proxies, active_proxies, unhealthy_proxies, total_requests): (
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)::bigint AS total,
                COUNT(*) FILTER (WHERE status = 'active')::bigint AS active,
                COUNT(*) FILTER (WHERE status = 'unhealthy')::bigint AS unhealthy,
                COALESCE(SUM(requests), 0)::bigint AS total_requests
            FROM proxies
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let avg_success_rate: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                AVG(
                    CASE WHEN requests > 0
                    THEN (successful_requests::float / requests::float) * 100
                    ELSE 0
                    END
                ),
                0
            ) FROM proxies
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let avg_response_time: i32 = sqlx::query_scalar(
            "SELECT COALESCE(AVG(avg_response_time), 0)::INTEGER FROM proxies WHERE requests > 0",
        )
        .fetch_one(&self.pool)
        .await?;

        let requests_last_hour: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM proxy_requests WHERE timestamp >= NOW() - INTERVAL '1 hour'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardStats {
            active_proxies,
            unhealthy_proxies,
            total_proxies,
            total_requests,
            requests_last_hour,
            avg_success_rate,
            avg_response_time,
        })
    }
}
