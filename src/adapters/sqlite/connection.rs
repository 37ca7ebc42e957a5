//! SQLite connection pool and schema setup.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::domain::models::config::DatabaseConfig;

/// Create a connection pool against the configured database file, creating
/// the file and its parent directory on first use.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let url = format!("sqlite://{}?mode=rwc", config.path);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database at {}", config.path))?;

    initialize_schema(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests. A single connection keeps the database alive
/// for the pool's lifetime.
pub async fn create_test_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("failed to open in-memory database")?;
    initialize_schema(&pool).await?;
    Ok(pool)
}

async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            progress REAL NOT NULL DEFAULT 0.0,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create jobs table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await
        .context("failed to create status index")?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_expires_at ON jobs(expires_at)")
        .execute(pool)
        .await
        .context("failed to create expiry index")?;

    Ok(())
}
