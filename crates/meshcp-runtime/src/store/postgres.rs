use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use meshcp_core::config::StoreConfig;
use meshcp_core::{MeshError, Result};

use super::{ResourceStore, StoreFuture, StoredResource};

/// Records shared by all replicas through a PostgreSQL table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the store configuration.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| MeshError::Store(format!("Failed to connect to store: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the resource table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meshcp_resources (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MeshError::Store(e.to_string()))?;

        Ok(())
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl ResourceStore for PgStore {
    fn get<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<StoredResource>> {
        Box::pin(async move {
            let row: Option<(String, i64)> =
                sqlx::query_as("SELECT value, version FROM meshcp_resources WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| MeshError::Store(e.to_string()))?;

            Ok(row.map(|(value, version)| StoredResource { value, version }))
        })
    }

    fn create<'a>(&'a self, name: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO meshcp_resources (name, value, version, updated_at)
                VALUES ($1, $2, 1, NOW())
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| MeshError::Store(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(MeshError::Conflict(format!("{} already exists", name)));
            }
            Ok(())
        })
    }

    fn update<'a>(
        &'a self,
        name: &'a str,
        value: String,
        expected_version: i64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE meshcp_resources
                SET value = $2, version = version + 1, updated_at = NOW()
                WHERE name = $1 AND version = $3
                "#,
            )
            .bind(name)
            .bind(value)
            .bind(expected_version)
            .execute(&self.pool)
            .await
            .map_err(|e| MeshError::Store(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(MeshError::Conflict(format!(
                    "{} changed since version {}",
                    name, expected_version
                )));
            }
            Ok(())
        })
    }
}
