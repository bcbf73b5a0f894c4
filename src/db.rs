//! SQLite database connection management.
//!
//! Provides a connection pool with WAL mode enabled so readers never block
//! on the single writer and never observe an uncommitted transaction. The
//! database file and its parent directories are created automatically.
//!
//! A busy timeout is set on every connection. Together with the store's
//! `BEGIN IMMEDIATE` write transactions, ingestion of two threads, or an
//! ingest racing a full reindex, queue on the write lock instead of
//! failing with `SQLITE_BUSY`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::{Config, DbConfig};

/// Create a connection pool to the configured SQLite database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_db(&config.db).await
}

pub async fn connect_db(db: &DbConfig) -> Result<SqlitePool> {
    connect_path(
        &db.path,
        db.max_connections,
        Duration::from_secs(db.busy_timeout_secs),
    )
    .await
}

/// Open (creating if missing) the database at `path`.
pub async fn connect_path(
    path: &Path,
    max_connections: u32,
    busy_timeout: Duration,
) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    Ok(pool)
}
