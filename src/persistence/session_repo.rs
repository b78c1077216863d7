//! Session repository for `SQLite` persistence.

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::session::{Session, SessionField, WorkingHours};
use crate::{AppError, Result};

use super::db::Database;

const SESSION_COLUMNS: &str = "id, name, session_key, delay, jitter, lost_limit, kill_date, \
     working_hours, elevated, username, hostname, internal_ip, external_ip, os_details, \
     process_name, process_id, listener, checkin_time, last_checkin";

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: String,
    session_key: String,
    delay: i64,
    jitter: f64,
    lost_limit: i64,
    kill_date: Option<String>,
    working_hours: Option<String>,
    elevated: i64,
    username: Option<String>,
    hostname: Option<String>,
    internal_ip: Option<String>,
    external_ip: Option<String>,
    os_details: Option<String>,
    process_name: Option<String>,
    process_id: Option<i64>,
    listener: String,
    checkin_time: String,
    last_checkin: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let kill_date = self
            .kill_date
            .map(|raw| {
                raw.parse::<NaiveDate>()
                    .map_err(|err| AppError::Db(format!("invalid kill_date: {err}")))
            })
            .transpose()?;
        let working_hours = self.working_hours.as_deref().map(WorkingHours::parse).transpose()?;

        Ok(Session {
            id: self.id,
            name: self.name,
            session_key: self.session_key,
            delay: to_u32(self.delay, "delay")?,
            jitter: self.jitter,
            lost_limit: to_u32(self.lost_limit, "lost_limit")?,
            kill_date,
            working_hours,
            elevated: self.elevated != 0,
            username: self.username,
            hostname: self.hostname,
            internal_ip: self.internal_ip,
            external_ip: self.external_ip,
            os_details: self.os_details,
            process_name: self.process_name,
            process_id: self.process_id.map(|pid| to_u32(pid, "process_id")).transpose()?,
            listener: self.listener,
            checkin_time: parse_utc(&self.checkin_time)?,
            last_checkin: parse_utc(&self.last_checkin)?,
        })
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Db(format!("column {column} out of range: {value}")))
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the id or name is already taken, or
    /// `AppError::Db` on any other insert failure.
    pub async fn create(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO session (id, name, session_key, delay, jitter, lost_limit, kill_date, \
             working_hours, elevated, username, hostname, internal_ip, external_ip, os_details, \
             process_name, process_id, listener, checkin_time, last_checkin, results) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, '')",
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(&session.session_key)
        .bind(i64::from(session.delay))
        .bind(session.jitter)
        .bind(i64::from(session.lost_limit))
        .bind(session.kill_date.map(|d| d.to_string()))
        .bind(session.working_hours.map(|wh| wh.render()))
        .bind(i64::from(session.elevated))
        .bind(&session.username)
        .bind(&session.hostname)
        .bind(&session.internal_ip)
        .bind(&session.external_ip)
        .bind(&session.os_details)
        .bind(&session.process_name)
        .bind(session.process_id.map(i64::from))
        .bind(&session.listener)
        .bind(session.checkin_time.to_rfc3339())
        .bind(session.last_checkin.to_rfc3339())
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AppError::Conflict(format!("session id or name '{}' already exists", session.name)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get(&self, id: &str) -> Result<Session> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM session WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        row.ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))?
            .into_session()
    }

    /// Retrieve a session by alias, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM session WHERE name = ?1"))
                .bind(name)
                .fetch_optional(&self.db)
                .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// List all sessions in registration order.
    ///
    /// Ordered by insertion rowid: `checkin_time` ties for sessions
    /// registered in the same instant, so the timestamp alone cannot
    /// carry the ordering contract.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM session ORDER BY rowid ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Update the liveness timestamp for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn touch_checkin(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE session SET last_checkin = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now.to_rfc3339())
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session '{id}' not found")));
        }
        Ok(())
    }

    /// Apply a typed field mutation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Conflict` on a name collision.
    pub async fn apply_field(&self, id: &str, field: &SessionField) -> Result<()> {
        let result = match field {
            SessionField::Name(name) => {
                sqlx::query("UPDATE session SET name = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(name)
                    .execute(&self.db)
                    .await
            }
            SessionField::Delay(delay) => {
                sqlx::query("UPDATE session SET delay = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(i64::from(*delay))
                    .execute(&self.db)
                    .await
            }
            SessionField::Jitter(jitter) => {
                sqlx::query("UPDATE session SET jitter = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(*jitter)
                    .execute(&self.db)
                    .await
            }
            SessionField::LostLimit(limit) => {
                sqlx::query("UPDATE session SET lost_limit = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(i64::from(*limit))
                    .execute(&self.db)
                    .await
            }
            SessionField::KillDate(date) => {
                sqlx::query("UPDATE session SET kill_date = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(date.map(|d| d.to_string()))
                    .execute(&self.db)
                    .await
            }
            SessionField::WorkingHours(hours) => {
                sqlx::query("UPDATE session SET working_hours = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(hours.map(|wh| wh.render()))
                    .execute(&self.db)
                    .await
            }
            SessionField::Elevated(elevated) => {
                sqlx::query("UPDATE session SET elevated = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(i64::from(*elevated))
                    .execute(&self.db)
                    .await
            }
            SessionField::LastCheckin(when) => {
                sqlx::query("UPDATE session SET last_checkin = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(when.to_rfc3339())
                    .execute(&self.db)
                    .await
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict(format!(
                    "another session already uses that {}",
                    field.field_name()
                )));
            }
            Err(err) => return Err(err.into()),
        };

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session '{id}' not found")));
        }
        Ok(())
    }

    /// Append decoded output to the session's result buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn append_result(&self, id: &str, output: &str) -> Result<()> {
        let result = sqlx::query("UPDATE session SET results = results || ?2 WHERE id = ?1")
            .bind(id)
            .bind(output)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session '{id}' not found")));
        }
        Ok(())
    }

    /// Return and clear the session's accumulated result buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn take_results(&self, id: &str) -> Result<String> {
        // Single statement so a result appended between a read and a clear
        // can never be lost.
        let row: Option<(String,)> =
            sqlx::query_as("UPDATE session SET results = '' WHERE id = ?1 RETURNING results")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        let Some((results,)) = row else {
            return Err(AppError::NotFound(format!("session '{id}' not found")));
        };
        Ok(results)
    }

    /// Delete a session record. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
