pub mod catalog_repository;
pub mod execution_repository;
#[cfg(test)]
pub mod mock_db;
pub mod schema;
pub mod sqlite_catalog_repository;
pub mod sqlite_execution_repository;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Opens the pool and verifies it with a round trip.
pub async fn establish_connection(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    schema::bootstrap(&pool).await.expect("schema bootstrap");
    pool
}
