use crate::error::Result;
use crate::models::{
    CreateProxyRequest, PaginatedResponse, Proxy, ProxyListParams, ProxyStatus, ProxyWithStats,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

const PROXY_COLUMNS: &str = r#"
    id, address, protocol, status,
    requests, successful_requests, failed_requests,
    avg_response_time, created_at, updated_at
"#;

/// Repository for the proxy inventory
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a proxy by ID
    pub async fn get(&self, id: i32) -> Result<Option<Proxy>> {
        let query = format!("SELECT {} FROM proxies WHERE id = $1", PROXY_COLUMNS);
        let proxy = sqlx::query_as::<_, Proxy>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    /// All active proxies, ordered by id ascending so round-robin stays
    /// deterministic across refreshes
    pub async fn list_active(&self) -> Result<Vec<Proxy>> {
        let query = format!(
            "SELECT {} FROM proxies WHERE status = 'active' ORDER BY id ASC",
            PROXY_COLUMNS
        );
        let proxies = sqlx::query_as::<_, Proxy>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(proxies)
    }

    /// All proxies with the given status, ordered by id ascending
    pub async fn list_by_status(&self, status: ProxyStatus) -> Result<Vec<Proxy>> {
        let query = format!(
            "SELECT {} FROM proxies WHERE status = $1 ORDER BY id ASC",
            PROXY_COLUMNS
        );
        let proxies = sqlx::query_as::<_, Proxy>(&query)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(proxies)
    }

    /// List proxies with pagination and filtering
    pub async fn list(
        &self,
        params: &ProxyListParams,
    ) -> Result<PaginatedResponse<ProxyWithStats>> {
        let page = params.page.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        // Count query
        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM proxies WHERE 1=1");
        if let Some(ref status) = params.status {
            if !status.is_empty() {
                count_query.push(" AND status = ").push_bind(status);
            }
        }
        if let Some(ref protocol) = params.protocol {
            if !protocol.is_empty() {
                count_query.push(" AND protocol = ").push_bind(protocol);
            }
        }

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        // Data query
        let mut data_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM proxies WHERE 1=1",
            PROXY_COLUMNS
        ));

        if let Some(ref status) = params.status {
            if !status.is_empty() {
                data_query.push(" AND status = ").push_bind(status);
            }
        }
        if let Some(ref protocol) = params.protocol {
            if !protocol.is_empty() {
                data_query.push(" AND protocol = ").push_bind(protocol);
            }
        }

        data_query
            .push(" ORDER BY id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let proxies: Vec<Proxy> = data_query.build_query_as().fetch_all(&self.pool).await?;

        let data: Vec<ProxyWithStats> = proxies.into_iter().map(ProxyWithStats::from).collect();

        Ok(PaginatedResponse::new(data, total, page, limit))
    }

    /// Create a new proxy
    pub async fn create(&self, req: &CreateProxyRequest) -> Result<Proxy> {
        let query = format!(
            "INSERT INTO proxies (address, protocol) VALUES ($1, $2) RETURNING {}",
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, Proxy>(&query)
            .bind(&req.address)
            .bind(req.protocol.to_lowercase())
            .fetch_one(&self.pool)
            .await?;

        info!(id = proxy.id, address = %proxy.address, "Created proxy");
        Ok(proxy)
    }

    /// Delete a proxy
    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id = id, "Deleted proxy");
        }

        Ok(deleted)
    }

    /// Record the outcome of one dispatch attempt.
    ///
    /// Counter increments commute; the rolling mean
    /// `new = old + (sample - old) / total` is approximate under concurrent
    /// writers and is display-only.
    pub async fn record_attempt(&self, id: i32, success: bool, response_time_ms: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET
                requests = requests + 1,
                successful_requests = successful_requests + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_requests = failed_requests + CASE WHEN $2 THEN 0 ELSE 1 END,
                avg_response_time = avg_response_time + (($3 - avg_response_time) / (requests + 1))::INTEGER
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(response_time_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set a proxy's status
    pub async fn set_status(&self, id: i32, status: ProxyStatus) -> Result<()> {
        sqlx::query("UPDATE proxies SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get proxy count by status
    pub async fn count_by_status(&self, status: ProxyStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
