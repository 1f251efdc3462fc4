pub mod records;
pub mod sync;
pub mod upsert;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use unisync_common::error::{UnisyncError, UnisyncResult};

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> UnisyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| UnisyncError::Database(e.to_string()))
}

/// Apply the bundled migrations for `sync_state` and `sync_run`.
pub async fn run_migrations(pool: &PgPool) -> UnisyncResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| UnisyncError::Database(e.to_string()))
}
