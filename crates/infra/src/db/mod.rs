//! Database adapters: connection pool, transient-failure retry and schema.

pub mod retry;
pub mod schema;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseConfig;

pub use retry::{ExecutionStrategy, Transient};
pub use schema::ensure_schema;

/// Connect to PostgreSQL, retrying transient connection failures.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let strategy = ExecutionStrategy::from_config(config);

    let pool = strategy
        .execute("connect", || {
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
        })
        .await?;

    info!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}
