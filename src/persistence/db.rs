//! `SQLite` connection bootstrap.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared connection pool.
pub type Database = SqlitePool;

/// Connect to the on-disk database, creating the file and parent directory
/// if missing, and apply the schema.
///
/// An unreachable backing store is the one fatal condition in this engine;
/// the error is surfaced to the caller rather than retried.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails,
/// or `AppError::Io` if the parent directory cannot be created.
pub async fn connect(path: impl AsRef<Path>) -> Result<Database> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::Io(format!("failed to create db dir: {err}")))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|err| AppError::Db(format!("invalid db path: {err}")))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Connect to a fresh in-memory database and apply the schema.
///
/// Capped at one connection: each in-memory `SQLite` connection is its own
/// database, so a larger pool would hand out empty databases.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect_memory() -> Result<Database> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}
