mod fingerprint_ops;
mod mappers;
mod rows;
mod settings_ops;
mod usage_ops;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::error::{RemedyError, Result};

pub const SCHEMA_SQL: &str = include_str!("../../schema.sql");

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

#[derive(Clone)]
pub struct RemedyDb {
    pool: PgPool,
}

impl RemedyDb {
    /// # Errors
    /// Returns an error when the pool cannot connect.
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = resolve_pool_max_connections();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to PostgreSQL remedy database");
        Ok(Self { pool })
    }

    /// Create a new `RemedyDb` with an existing pool (for testing).
    #[must_use]
    pub const fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies a multi-statement schema script.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn initialize_schema_from_sql(&self, schema_sql: &str) -> Result<()> {
        self.pool()
            .execute(schema_sql)
            .await
            .map(|_result| ())
            .map_err(|e| RemedyError::DatabaseError(format!("Failed to initialize schema: {e}")))
    }

    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.initialize_schema_from_sql(SCHEMA_SQL).await
    }
}

fn resolve_pool_max_connections() -> u32 {
    resolve_pool_max_connections_from(|key| std::env::var(key).ok())
}

fn resolve_pool_max_connections_from<F>(env_lookup: F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    env_lookup("REMEDY_DB_MAX_CONNECTIONS")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}
