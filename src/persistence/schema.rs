//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so the
//! bootstrap is safe to re-run on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    name            TEXT NOT NULL UNIQUE,
    session_key     TEXT NOT NULL,
    delay           INTEGER NOT NULL,
    jitter          REAL NOT NULL,
    lost_limit      INTEGER NOT NULL,
    kill_date       TEXT,
    working_hours   TEXT,
    elevated        INTEGER NOT NULL DEFAULT 0,
    username        TEXT,
    hostname        TEXT,
    internal_ip     TEXT,
    external_ip     TEXT,
    os_details      TEXT,
    process_name    TEXT,
    process_id      INTEGER,
    listener        TEXT NOT NULL,
    checkin_time    TEXT NOT NULL,
    last_checkin    TEXT NOT NULL,
    results         TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS listener (
    name              TEXT PRIMARY KEY NOT NULL,
    kind              TEXT NOT NULL CHECK(kind IN ('native','pivot','hop')),
    host              TEXT,
    port              INTEGER,
    cert_path         TEXT,
    profile           TEXT,
    redirect_target   TEXT,
    default_delay     INTEGER NOT NULL,
    default_jitter    REAL NOT NULL,
    default_lost_limit INTEGER NOT NULL,
    kill_date         TEXT,
    working_hours     TEXT,
    running           INTEGER NOT NULL DEFAULT 0
);
";

    for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
