use crate::error::{Result, RotaError};
use sqlx::PgPool;
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    // Run each migration in order
    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(RotaError::Database)?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(RotaError::Database)?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(RotaError::Database)?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(RotaError::Database)?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_table", MIGRATION_001_PROXIES),
        (2, "settings_table", MIGRATION_002_SETTINGS),
        (3, "proxy_requests_table", MIGRATION_003_PROXY_REQUESTS),
    ]
}

// Migration 1: proxy inventory
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id SERIAL PRIMARY KEY,
    address VARCHAR(255) NOT NULL,
    protocol VARCHAR(20) NOT NULL DEFAULT 'http',
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    requests BIGINT NOT NULL DEFAULT 0,
    successful_requests BIGINT NOT NULL DEFAULT 0,
    failed_requests BIGINT NOT NULL DEFAULT 0,
    avg_response_time INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- address+protocol must be unique among rows still in play
CREATE UNIQUE INDEX IF NOT EXISTS uniq_proxies_address_protocol
    ON proxies(address, protocol)
    WHERE status <> 'disabled';

CREATE INDEX IF NOT EXISTS idx_proxies_status ON proxies(status);

-- Updated_at trigger
CREATE OR REPLACE FUNCTION update_updated_at_column()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ language 'plpgsql';

DROP TRIGGER IF EXISTS update_proxies_updated_at ON proxies;
CREATE TRIGGER update_proxies_updated_at
    BEFORE UPDATE ON proxies
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 2: settings table with the default rotation record
const MIGRATION_002_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key VARCHAR(100) PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

INSERT INTO settings (key, value) VALUES
    ('rotation', '{"method": "round-robin", "rate_limited": {"max_requests_per_window": 30, "window_seconds": 60}, "remove_unhealthy": true, "fallback": true, "timeout": 30, "retries": 3}')
ON CONFLICT (key) DO NOTHING;

DROP TRIGGER IF EXISTS update_settings_updated_at ON settings;
CREATE TRIGGER update_settings_updated_at
    BEFORE UPDATE ON settings
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 3: append-only request accounting
const MIGRATION_003_PROXY_REQUESTS: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_requests (
    id BIGSERIAL,
    proxy_id INTEGER NOT NULL,
    proxy_address VARCHAR(255) NOT NULL,
    method VARCHAR(10),
    url TEXT,
    status_code INTEGER,
    success BOOLEAN NOT NULL DEFAULT false,
    response_time INTEGER NOT NULL DEFAULT 0,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (id, timestamp)
);

-- Supports the rate-limited selector's bulk window query
CREATE INDEX IF NOT EXISTS idx_proxy_requests_window
    ON proxy_requests(timestamp, proxy_id, success);
"#;
