use crate::error::{Result, RotaError};
use crate::models::{keys, RotationSettings, SettingsRecord};
use sqlx::PgPool;
use tracing::info;

/// Repository for settings database operations
#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a specific setting by key
    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let record = sqlx::query_as::<_, SettingsRecord>(
            "SELECT key, value, updated_at FROM settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RotaError::SettingsNotFound {
            key: key.to_string(),
        })?;

        let value = serde_json::from_value(record.value).map_err(|e| {
            RotaError::Internal(format!("Failed to parse setting '{}': {}", key, e))
        })?;

        Ok(value)
    }

    /// Get rotation settings
    pub async fn get_rotation(&self) -> Result<RotationSettings> {
        self.get(keys::ROTATION).await
    }

    /// Set a specific setting
    pub async fn set<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| RotaError::Internal(format!("Failed to serialize setting: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(json_value)
        .execute(&self.pool)
        .await?;

        info!(key = key, "Updated setting");
        Ok(())
    }

    /// Persist rotation settings. Callers must validate first; the running
    /// selector is never replaced with an invalid configuration.
    pub async fn set_rotation(&self, settings: &RotationSettings) -> Result<()> {
        self.set(keys::ROTATION, settings).await
    }
}
