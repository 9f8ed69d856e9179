//! SQLite helpers: pool creation plus sqlx migrations
//!
//! Migrations live in `migrations/` at the crate root and are embedded with
//! `sqlx::migrate!()`.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Creates a SQLite pool and runs every pending migration.
///
/// In-memory databases live per connection, so they get a single connection
/// that is never recycled.
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("invalid SQLite URL: {}", db_url))?
        .create_if_missing(true);

    let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open SQLite database: {}", db_url))?;

    sqlx::migrate!().run(&pool).await.context("migration failed")?;

    Ok(pool)
}
