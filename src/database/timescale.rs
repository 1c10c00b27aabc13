use crate::error::{Result, RotaError};
use sqlx::PgPool;
use tracing::{info, warn};

/// Allowed table names for TimescaleDB operations
const ALLOWED_HYPERTABLES: &[&str] = &["proxy_requests"];

/// Check if TimescaleDB extension is available
pub async fn is_timescaledb_available(pool: &PgPool) -> bool {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM pg_extension WHERE extname = 'timescaledb'",
    )
    .fetch_one(pool)
    .await;

    matches!(result, Ok(count) if count > 0)
}

/// Setup TimescaleDB hypertables if the extension is available.
///
/// Request-record retention is owned by the store, not by the process: when
/// TimescaleDB is present the request log becomes a hypertable with a
/// retention policy, otherwise rows simply accumulate in a plain table.
pub async fn setup_timescaledb(pool: &PgPool) -> Result<()> {
    if !is_timescaledb_available(pool).await {
        info!("TimescaleDB not available, skipping hypertable setup");
        return Ok(());
    }

    info!("TimescaleDB detected, setting up hypertables");

    convert_to_hypertable(pool, "proxy_requests", "timestamp", "1 day").await?;
    add_retention_policy(pool, "proxy_requests", 30).await?;

    Ok(())
}

/// Convert a table to a TimescaleDB hypertable
async fn convert_to_hypertable(
    pool: &PgPool,
    table_name: &str,
    time_column: &str,
    chunk_interval: &str,
) -> Result<()> {
    if !ALLOWED_HYPERTABLES.contains(&table_name) {
        return Err(RotaError::InvalidConfig(format!(
            "Table '{}' is not allowed for hypertable conversion",
            table_name
        )));
    }

    // Check if already a hypertable
    let is_hypertable = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM timescaledb_information.hypertables WHERE hypertable_name = $1",
    )
    .bind(table_name)
    .fetch_one(pool)
    .await
    .unwrap_or(0);

    if is_hypertable > 0 {
        info!(table = table_name, "Table is already a hypertable");
        return Ok(());
    }

    // Table name comes from the whitelist above
    let query = format!(
        "SELECT create_hypertable('{}', '{}', chunk_time_interval => INTERVAL '{}', if_not_exists => TRUE, migrate_data => TRUE)",
        table_name, time_column, chunk_interval
    );

    match sqlx::query(&query).execute(pool).await {
        Ok(_) => {
            info!(
                table = table_name,
                time_column = time_column,
                "Converted table to hypertable"
            );
        }
        Err(e) => {
            warn!(
                table = table_name,
                error = %e,
                "Failed to convert table to hypertable (may already be converted)"
            );
        }
    }

    Ok(())
}

/// Add or update retention policy for a hypertable
pub async fn add_retention_policy(
    pool: &PgPool,
    table_name: &str,
    retention_days: i32,
) -> Result<()> {
    if !ALLOWED_HYPERTABLES.contains(&table_name) {
        return Err(RotaError::InvalidConfig(format!(
            "Table '{}' is not allowed for retention policy",
            table_name
        )));
    }

    let retention_days = retention_days.clamp(1, 365);

    if !is_timescaledb_available(pool).await {
        return Ok(());
    }

    // Remove existing policy first
    let remove_query = format!(
        "SELECT remove_retention_policy('{}', if_exists => true)",
        table_name
    );
    let _ = sqlx::query(&remove_query).execute(pool).await;

    let add_query = format!(
        "SELECT add_retention_policy('{}', INTERVAL '{} days', if_not_exists => true)",
        table_name, retention_days
    );

    sqlx::query(&add_query)
        .execute(pool)
        .await
        .map_err(RotaError::Database)?;

    info!(
        table = table_name,
        retention_days = retention_days,
        "Added retention policy"
    );

    Ok(())
}
