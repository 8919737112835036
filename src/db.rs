//! Database construction and schema initialization.
//!
//! The pool is built once at startup and passed explicitly into every store;
//! there is no module-level singleton handle.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;

use crate::error::Result;

/// Connect to the SQLite database at `url`, creating the file if missing,
/// and ensure the schema exists.
pub async fn connect(url: &str) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    info!(url, "database ready");
    Ok(pool)
}

/// Connect to a private in-memory database. Used by tests; a single
/// connection keeps every query on the same in-memory instance.
pub async fn connect_in_memory() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables if they do not exist.
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback_cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            hits INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_stats (
            day TEXT PRIMARY KEY,
            hits INTEGER NOT NULL DEFAULT 0,
            misses INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS question_sets (
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            level TEXT NOT NULL,
            interview_type TEXT NOT NULL,
            question_count INTEGER NOT NULL,
            questions TEXT NOT NULL,
            owner_id TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            average_rating REAL NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_question_sets_lookup
        ON question_sets (role, level, interview_type, question_count)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            interview_id TEXT,
            phone TEXT NOT NULL,
            amount INTEGER NOT NULL,
            status TEXT NOT NULL,
            checkout_request_id TEXT NOT NULL UNIQUE,
            merchant_request_id TEXT NOT NULL,
            mpesa_receipt TEXT,
            used INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            paid_at INTEGER,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_payments_access
        ON payments (user_id, interview_id, status, used)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
