//! Listener repository for `SQLite` persistence.

use chrono::NaiveDate;

use crate::models::listener::{Listener, ListenerKind, ListenerOptions};
use crate::models::session::WorkingHours;
use crate::{AppError, Result};

use super::db::Database;

const LISTENER_COLUMNS: &str = "name, kind, host, port, cert_path, profile, redirect_target, \
     default_delay, default_jitter, default_lost_limit, kill_date, working_hours, running";

/// Repository wrapper around `SQLite` for listener definitions.
#[derive(Clone)]
pub struct ListenerRepo {
    db: Database,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ListenerRow {
    name: String,
    kind: String,
    host: Option<String>,
    port: Option<i64>,
    cert_path: Option<String>,
    profile: Option<String>,
    redirect_target: Option<String>,
    default_delay: i64,
    default_jitter: f64,
    default_lost_limit: i64,
    kill_date: Option<String>,
    working_hours: Option<String>,
    running: i64,
}

impl ListenerRow {
    fn into_listener(self) -> Result<Listener> {
        let kill_date = self
            .kill_date
            .map(|raw| {
                raw.parse::<NaiveDate>()
                    .map_err(|err| AppError::Db(format!("invalid kill_date: {err}")))
            })
            .transpose()?;
        let working_hours = self.working_hours.as_deref().map(WorkingHours::parse).transpose()?;
        let port = self
            .port
            .map(|p| u16::try_from(p).map_err(|_| AppError::Db(format!("port out of range: {p}"))))
            .transpose()?;

        Ok(Listener {
            name: self.name,
            kind: ListenerKind::parse(&self.kind)?,
            options: ListenerOptions {
                host: self.host,
                port,
                cert_path: self.cert_path,
                profile: self.profile,
                redirect_target: self.redirect_target,
                default_delay: u32::try_from(self.default_delay)
                    .map_err(|_| AppError::Db("default_delay out of range".into()))?,
                default_jitter: self.default_jitter,
                default_lost_limit: u32::try_from(self.default_lost_limit)
                    .map_err(|_| AppError::Db("default_lost_limit out of range".into()))?,
                kill_date,
                working_hours,
            },
            running: self.running != 0,
        })
    }
}

impl ListenerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new listener definition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if a listener with the same name
    /// already exists.
    pub async fn create(&self, listener: &Listener) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO listener (name, kind, host, port, cert_path, profile, redirect_target, \
             default_delay, default_jitter, default_lost_limit, kill_date, working_hours, running) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&listener.name)
        .bind(listener.kind.as_str())
        .bind(&listener.options.host)
        .bind(listener.options.port.map(i64::from))
        .bind(&listener.options.cert_path)
        .bind(&listener.options.profile)
        .bind(&listener.options.redirect_target)
        .bind(i64::from(listener.options.default_delay))
        .bind(listener.options.default_jitter)
        .bind(i64::from(listener.options.default_lost_limit))
        .bind(listener.options.kill_date.map(|d| d.to_string()))
        .bind(listener.options.working_hours.map(|wh| wh.render()))
        .bind(i64::from(listener.running))
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AppError::Conflict(format!("listener '{}' already exists", listener.name)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    /// Retrieve a listener definition by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such listener is defined.
    pub async fn get(&self, name: &str) -> Result<Listener> {
        let row: Option<ListenerRow> =
            sqlx::query_as(&format!("SELECT {LISTENER_COLUMNS} FROM listener WHERE name = ?1"))
                .bind(name)
                .fetch_optional(&self.db)
                .await?;
        row.ok_or_else(|| AppError::NotFound(format!("listener '{name}' not found")))?
            .into_listener()
    }

    /// List all persisted listener definitions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Listener>> {
        let rows: Vec<ListenerRow> =
            sqlx::query_as(&format!("SELECT {LISTENER_COLUMNS} FROM listener ORDER BY name ASC"))
                .fetch_all(&self.db)
                .await?;
        rows.into_iter().map(ListenerRow::into_listener).collect()
    }

    /// List listeners whose persisted state is running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_running(&self) -> Result<Vec<Listener>> {
        let rows: Vec<ListenerRow> = sqlx::query_as(&format!(
            "SELECT {LISTENER_COLUMNS} FROM listener WHERE running = 1 ORDER BY name ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(ListenerRow::into_listener).collect()
    }

    /// Persist the running flag for a listener.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such listener is defined.
    pub async fn set_running(&self, name: &str, running: bool) -> Result<()> {
        let result = sqlx::query("UPDATE listener SET running = ?2 WHERE name = ?1")
            .bind(name)
            .bind(i64::from(running))
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("listener '{name}' not found")));
        }
        Ok(())
    }

    /// Delete a listener definition. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM listener WHERE name = ?1")
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
