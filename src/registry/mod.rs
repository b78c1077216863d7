//! Session registry: durable store of agent sessions and their mutable
//! runtime parameters.
//!
//! All mutations to a single session are serialized through a per-session
//! guard so that two check-ins racing on different listeners can never
//! interleave partial writes. Cross-session operations iterate sessions
//! independently and tolerate per-session failure without aborting.

pub mod staleness;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::events::{EventBus, EventSource};
use crate::models::listener::Listener;
use crate::models::session::{CheckinMetadata, Session, SessionField};
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::tasking::queue::TaskQueue;
use crate::{AppError, Result};

/// Wildcard accepted by [`SessionRegistry::remove`] to drop every session.
pub const REMOVE_ALL: &str = "%";

/// Process-wide registry of agent sessions.
pub struct SessionRegistry {
    repo: SessionRepo,
    queue: Arc<TaskQueue>,
    bus: EventBus,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    /// Create a registry over the shared database pool.
    #[must_use]
    pub fn new(db: Database, queue: Arc<TaskQueue>, bus: EventBus) -> Self {
        Self {
            repo: SessionRepo::new(db),
            queue,
            bus,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Per-session mutation guard. Callers hold the guard across a
    /// check-in's read-modify-write sequence.
    pub async fn session_guard(&self, id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        Arc::clone(guards.entry(id.to_owned()).or_default())
    }

    /// Register an inbound check-in: create a session on first contact,
    /// otherwise update its liveness timestamp.
    ///
    /// Returns the session and whether it was newly created. New sessions
    /// inherit the listener's default cadence parameters and are named
    /// after their id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on a persistence failure.
    pub async fn register(
        &self,
        listener: &Listener,
        meta: &CheckinMetadata,
        external_ip: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Session, bool)> {
        if let Some(id) = meta.session_id.as_deref() {
            match self.repo.get(id).await {
                Ok(mut session) => {
                    self.repo.touch_checkin(id, now).await?;
                    session.last_checkin = now;
                    return Ok((session, false));
                }
                // Unknown to us; the id is never reused, so fall through
                // and register the agent under a fresh one.
                Err(AppError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        let id = Session::generate_id();
        let session = Session {
            id: id.clone(),
            name: id.clone(),
            session_key: meta.session_key.clone(),
            delay: listener.options.default_delay,
            jitter: listener.options.default_jitter,
            lost_limit: listener.options.default_lost_limit,
            kill_date: listener.options.kill_date,
            working_hours: listener.options.working_hours,
            elevated: meta.elevated,
            username: meta.username.clone(),
            hostname: meta.hostname.clone(),
            internal_ip: meta.internal_ip.clone(),
            external_ip,
            os_details: meta.os_details.clone(),
            process_name: meta.process_name.clone(),
            process_id: meta.process_id,
            listener: listener.name.clone(),
            checkin_time: now,
            last_checkin: now,
        };
        self.repo.create(&session).await?;

        info!(session = %session.id, listener = %listener.name, "new agent registered");
        self.bus.publish(
            EventSource::Registry,
            format!(
                "initial checkin for agent {} via listener {}",
                session.name, listener.name
            ),
        );
        Ok((session, true))
    }

    /// Resolve a name or id to a session. The name match wins; names are
    /// unique so it is never ambiguous.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if neither a name nor an id matches.
    pub async fn resolve(&self, name_or_id: &str) -> Result<Session> {
        if let Some(session) = self.repo.find_by_name(name_or_id).await? {
            return Ok(session);
        }
        self.repo.get(name_or_id).await
    }

    /// Apply a typed field mutation to a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an out-of-range value,
    /// `AppError::NotFound` for an unknown session, or `AppError::Conflict`
    /// for a name collision.
    pub async fn set_field(&self, id: &str, field: SessionField) -> Result<()> {
        let field = field.validated()?;
        if let SessionField::Name(new_name) = &field {
            if let Some(existing) = self.repo.find_by_name(new_name).await? {
                if existing.id != id {
                    return Err(AppError::Conflict(format!("session name '{new_name}' already in use")));
                }
            }
        }

        let session = self.repo.get(id).await?;
        self.repo.apply_field(id, &field).await?;
        self.bus.publish(
            EventSource::Registry,
            format!("agent {} updated field {}", session.name, field.field_name()),
        );
        Ok(())
    }

    /// Rename a session, failing on collision and leaving both names
    /// untouched when the target is taken.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `old` does not resolve, or
    /// `AppError::Conflict` if `new_name` is already in use.
    pub async fn rename(&self, old: &str, new_name: &str) -> Result<()> {
        let session = self.resolve(old).await?;
        self.set_field(&session.id, SessionField::Name(new_name.to_owned()))
            .await
    }

    /// Remove a session, or every session with the `%` wildcard.
    ///
    /// Removal cascades: the session's pending tasks, partial results, and
    /// result buffer go with it. Removing an already-removed id reports
    /// `NotFound` and nothing else.
    ///
    /// Returns the ids removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a single unknown target, or
    /// `AppError::PartialBatch` when the wildcard removal fails for a
    /// subset of sessions.
    pub async fn remove(&self, target: &str) -> Result<Vec<String>> {
        if target == REMOVE_ALL {
            let sessions = self.repo.list().await?;
            let mut removed = Vec::new();
            let mut failures = Vec::new();
            for session in sessions {
                match self.remove_one(&session).await {
                    Ok(()) => removed.push(session.id),
                    Err(err) => failures.push(format!("session {}: {err}", session.id)),
                }
            }
            if failures.is_empty() {
                Ok(removed)
            } else {
                Err(AppError::PartialBatch(failures))
            }
        } else {
            let session = self.resolve(target).await?;
            self.remove_one(&session).await?;
            Ok(vec![session.id])
        }
    }

    async fn remove_one(&self, session: &Session) -> Result<()> {
        if !self.repo.remove(&session.id).await? {
            return Err(AppError::NotFound(format!("session '{}' not found", session.id)));
        }
        self.queue.remove_session(&session.id).await;
        self.guards.lock().await.remove(&session.id);
        self.bus.publish(
            EventSource::Registry,
            format!("agent {} removed", session.name),
        );
        Ok(())
    }

    /// Remove every session the staleness evaluator considers stale.
    ///
    /// Iterates independently; one failed removal does not abort the rest.
    ///
    /// Returns the ids removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PartialBatch` when a subset of removals fails.
    pub async fn remove_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let stale = self.list_stale(now).await?;
        let mut removed = Vec::new();
        let mut failures = Vec::new();
        for session in stale {
            match self.remove_one(&session).await {
                Ok(()) => removed.push(session.id),
                Err(err) => failures.push(format!("session {}: {err}", session.id)),
            }
        }
        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(AppError::PartialBatch(failures))
        }
    }

    /// List all sessions in registration order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Session>> {
        self.repo.list().await
    }

    /// List sessions the staleness evaluator considers stale as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_stale(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| staleness::is_stale(s.delay, s.jitter, s.last_checkin, now))
            .collect())
    }

    /// List sessions that checked in within the last `minutes` minutes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active_within(&self, now: DateTime<Utc>, minutes: u32) -> Result<Vec<Session>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| staleness::active_within(s.last_checkin, now, minutes))
            .collect())
    }

    /// Return and clear a session's accumulated result buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn take_results(&self, name_or_id: &str) -> Result<String> {
        let session = self.resolve(name_or_id).await?;
        self.repo.take_results(&session.id).await
    }
}
