use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::Result;
use crate::models::{PaginatedResponse, ProxyRequest, RequestListParams, RequestRecord};

/// Repository for the append-only request log
#[derive(Clone)]
pub struct RequestLogRepository {
    pool: PgPool,
}

impl RequestLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one attempt row. Rows are never updated.
    pub async fn append(&self, record: &RequestRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proxy_requests
            (proxy_id, proxy_address, method, url, status_code, success,
             response_time, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.proxy_id)
        .bind(&record.proxy_address)
        .bind(&record.method)
        .bind(&record.url)
        .bind(record.status_code)
        .bind(record.success)
        .bind(record.response_time)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Successful requests for one upstream since `since`.
    ///
    /// Failed attempts do not burn quota, so the count filters on
    /// `success = true`. The window boundary is inclusive on the lower end.
    pub async fn count_recent(&self, proxy_id: i32, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM proxy_requests
            WHERE proxy_id = $1 AND timestamp >= $2 AND success = true
            "#,
        )
        .bind(proxy_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Successful requests per upstream since `since`, in one round trip.
    /// Used by the rate-limited selector to refresh its usage view.
    pub async fn count_recent_all(&self, since: DateTime<Utc>) -> Result<HashMap<i32, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT proxy_id, COUNT(*) AS requests
            FROM proxy_requests
            WHERE timestamp >= $1 AND success = true
            GROUP BY proxy_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let proxy_id: i32 = row.try_get("proxy_id")?;
            let requests: i64 = row.try_get("requests")?;
            counts.insert(proxy_id, requests);
        }

        Ok(counts)
    }

    /// List request records with pagination and filtering, newest first
    pub async fn list(&self, params: &RequestListParams) -> Result<PaginatedResponse<ProxyRequest>> {
        let page = params.page.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(50).clamp(1, 100);
        let offset = (page - 1) * limit;

        // Count query
        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM proxy_requests WHERE 1=1");
        if let Some(proxy_id) = params.proxy_id {
            count_query.push(" AND proxy_id = ").push_bind(proxy_id);
        }
        if let Some(success) = params.success {
            count_query.push(" AND success = ").push_bind(success);
        }

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        // Data query
        let mut data_query = QueryBuilder::<Postgres>::new(
            r#"
            SELECT id, proxy_id, proxy_address, method, url, status_code,
                   success, response_time, timestamp
            FROM proxy_requests
            WHERE 1=1
            "#,
        );
        if let Some(proxy_id) = params.proxy_id {
            data_query.push(" AND proxy_id = ").push_bind(proxy_id);
        }
        if let Some(success) = params.success {
            data_query.push(" AND success = ").push_bind(success);
        }

        data_query
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let records: Vec<ProxyRequest> = data_query.build_query_as().fetch_all(&self.pool).await?;

        Ok(PaginatedResponse::new(records, total, page, limit))
    }
}
