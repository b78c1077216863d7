//! Tasking dispatcher: command-kind selection, save framing, target
//! resolution, fan-out, and result recording.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::events::{EventBus, EventSource};
use crate::models::module::ModuleMetadata;
use crate::models::session::{Session, SessionField, WorkingHours};
use crate::models::task::{ResultFragment, Task, TaskCommand, TaskKind};
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::registry::SessionRegistry;
use crate::{AppError, Result};

use super::queue::TaskQueue;

/// Fixed width of the save-framing name token. Wire contract with the
/// result-ingestion path; never change without versioning the format.
pub const SAVE_NAME_WIDTH: usize = 15;
/// Fixed width of the save-framing extension token. Same contract.
pub const SAVE_EXT_WIDTH: usize = 5;

/// Addressing for an enqueue operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTarget {
    /// One session, by name or id.
    Session(String),
    /// Fan out a copy to every active session.
    All,
    /// Store as the template applied to every future new session.
    Autorun,
}

impl TaskTarget {
    /// Parse an operator-facing target string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "autorun" => Self::Autorun,
            _ => Self::Session(raw.to_owned()),
        }
    }
}

/// Outcome of an operation that may address many sessions.
///
/// Failures are collected per session and never roll back the successes.
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Session ids (or `autorun`) that were tasked, in registry iteration
    /// order.
    pub tasked: Vec<String>,
    /// Per-target failure descriptions.
    pub failures: Vec<String>,
}

impl FanoutReport {
    fn single(id: impl Into<String>) -> Self {
        Self {
            tasked: vec![id.into()],
            failures: Vec::new(),
        }
    }

    /// Convert to a hard error when any target failed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PartialBatch` carrying every failure.
    pub fn ensure_complete(self) -> Result<Vec<String>> {
        if self.failures.is_empty() {
            Ok(self.tasked)
        } else {
            Err(AppError::PartialBatch(self.failures))
        }
    }
}

/// Decide the command variant for a module. Pure.
#[must_use]
pub fn select_command(meta: &ModuleMetadata) -> TaskCommand {
    let kind = if meta.background {
        TaskKind::Job
    } else if meta.run_on_disk {
        TaskKind::RunFromDisk
    } else {
        TaskKind::RunInline
    };
    TaskCommand {
        kind,
        save: meta.extension().is_some(),
    }
}

/// Parsed save-framing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    /// Save-file name token (module short name, at most 15 chars).
    pub name: String,
    /// Extension token (at most 5 chars).
    pub extension: String,
}

/// Map a token to printable ASCII and truncate to `width` bytes. The
/// header fields are byte-exact on the wire, so every token character
/// must occupy exactly one byte.
fn save_token(raw: &str, width: usize) -> String {
    raw.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .take(width)
        .collect()
}

/// Prepend the fixed-width save-framing header to a payload:
/// a left-padded 15-byte name token, a left-padded 5-byte extension
/// token, then the raw payload. Non-ASCII token characters are mapped
/// to `_` so the padded fields stay byte-exact.
#[must_use]
pub fn frame_save_payload(module_short_name: &str, extension: &str, payload: &[u8]) -> Vec<u8> {
    let name = save_token(module_short_name, SAVE_NAME_WIDTH);
    let extension = save_token(extension, SAVE_EXT_WIDTH);
    let mut framed = format!(
        "{name:>name_width$}{extension:>ext_width$}",
        name_width = SAVE_NAME_WIDTH,
        ext_width = SAVE_EXT_WIDTH
    )
    .into_bytes();
    framed.extend_from_slice(payload);
    framed
}

/// Split a save-framed payload back into its header and raw payload.
///
/// Left-padding is reversed by trimming leading spaces from each token.
///
/// # Errors
///
/// Returns `AppError::Validation` if the payload is shorter than the
/// header or the header is not valid UTF-8.
pub fn parse_save_header(framed: &[u8]) -> Result<(SaveHeader, &[u8])> {
    let header_len = SAVE_NAME_WIDTH + SAVE_EXT_WIDTH;
    if framed.len() < header_len {
        return Err(AppError::Validation(format!(
            "save payload shorter than {header_len}-byte header"
        )));
    }
    // Byte-width fields: decode each independently so a stray multibyte
    // sequence straddling the field boundary is an error, never a panic.
    let name = std::str::from_utf8(&framed[..SAVE_NAME_WIDTH])
        .map_err(|err| AppError::Validation(format!("save name token is not UTF-8: {err}")))?;
    let extension = std::str::from_utf8(&framed[SAVE_NAME_WIDTH..header_len])
        .map_err(|err| AppError::Validation(format!("save extension token is not UTF-8: {err}")))?;
    Ok((
        SaveHeader {
            name: name.trim_start().to_owned(),
            extension: extension.trim_start().to_owned(),
        },
        &framed[header_len..],
    ))
}

/// Renders the control directive an agent receives when its cadence
/// parameters are changed server-side.
fn control_directive(assignments: &str) -> Vec<u8> {
    format!("SET {assignments}").into_bytes()
}

/// Per-session tasking precondition: elevated modules require an elevated
/// session.
fn admin_gate(session: &Session, meta: &ModuleMetadata) -> Result<()> {
    if meta.needs_admin && !session.elevated {
        return Err(AppError::Validation(format!(
            "module {} requires an elevated context",
            meta.name
        )));
    }
    Ok(())
}

/// Dispatcher over the shared queue, registry, and result buffer.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    queue: Arc<TaskQueue>,
    repo: SessionRepo,
    bus: EventBus,
}

impl Dispatcher {
    /// Create a dispatcher over the shared state.
    #[must_use]
    pub fn new(
        db: Database,
        registry: Arc<SessionRegistry>,
        queue: Arc<TaskQueue>,
        bus: EventBus,
    ) -> Self {
        Self {
            registry,
            queue,
            repo: SessionRepo::new(db),
            bus,
        }
    }

    async fn resolve_targets(&self, target: &TaskTarget) -> Result<Vec<Session>> {
        match target {
            TaskTarget::Session(name_or_id) => Ok(vec![self.registry.resolve(name_or_id).await?]),
            TaskTarget::All => self.registry.list().await,
            TaskTarget::Autorun => Err(AppError::Validation(
                "operation does not support the autorun target".into(),
            )),
        }
    }

    /// Task a module's generated payload at a target.
    ///
    /// Selects the command kind from the module metadata, applies save
    /// framing when the module declares an output extension, and enforces
    /// the admin gate per session. Fan-out is non-transactional: failures
    /// are collected in the report (and published), successes stand.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation`/`AppError::NotFound` for a failed
    /// single-session target; fan-out failures are reported, not returned.
    pub async fn task_module(
        &self,
        target: &TaskTarget,
        meta: &ModuleMetadata,
        payload: Vec<u8>,
    ) -> Result<FanoutReport> {
        let command = select_command(meta);
        let payload = if let Some(extension) = meta.extension() {
            frame_save_payload(meta.short_name(), extension, &payload)
        } else {
            payload
        };

        if *target == TaskTarget::Autorun {
            self.queue.set_autorun(command, payload).await;
            self.bus.publish(
                EventSource::Tasking,
                format!("module {} set as global autorun", meta.name),
            );
            return Ok(FanoutReport::single("autorun"));
        }

        let sessions = self.resolve_targets(target).await?;
        let fan_out = matches!(target, TaskTarget::All);
        let mut report = FanoutReport::default();
        for session in sessions {
            match admin_gate(&session, meta) {
                Ok(()) => {
                    self.queue
                        .enqueue(&session.id, Task::new(command, payload.clone()))
                        .await;
                    self.bus.publish(
                        EventSource::Tasking,
                        format!("tasked agent {} to run module {}", session.name, meta.name),
                    );
                    report.tasked.push(session.id);
                }
                Err(err) if fan_out => {
                    let failure = format!("session {}: {err}", session.id);
                    self.bus.publish(EventSource::Tasking, failure.clone());
                    report.failures.push(failure);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Update check-in cadence: persists the fields and tasks the agent to
    /// adopt them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for out-of-range values or the
    /// autorun target, `AppError::NotFound` for an unknown single target.
    pub async fn task_sleep(&self, target: &TaskTarget, delay: u32, jitter: f64) -> Result<FanoutReport> {
        SessionField::Delay(delay).validated()?;
        SessionField::Jitter(jitter).validated()?;
        self.control_task(
            target,
            &[SessionField::Delay(delay), SessionField::Jitter(jitter)],
            control_directive(&format!("delay={delay} jitter={jitter}")),
            &format!("set sleep to {delay}s with jitter {jitter}"),
        )
        .await
    }

    /// Update missed check-in tolerance on the server and the agent.
    ///
    /// # Errors
    ///
    /// Same contract as [`Dispatcher::task_sleep`].
    pub async fn task_lost_limit(&self, target: &TaskTarget, limit: u32) -> Result<FanoutReport> {
        self.control_task(
            target,
            &[SessionField::LostLimit(limit)],
            control_directive(&format!("lost_limit={limit}")),
            &format!("set lost limit to {limit} checkins"),
        )
        .await
    }

    /// Update (or clear) the kill date on the server and the agent.
    ///
    /// # Errors
    ///
    /// Same contract as [`Dispatcher::task_sleep`].
    pub async fn task_kill_date(&self, target: &TaskTarget, date: Option<NaiveDate>) -> Result<FanoutReport> {
        let directive = date.map_or_else(
            || control_directive("kill_date="),
            |d| control_directive(&format!("kill_date={}", d.format("%m/%d/%Y"))),
        );
        let description = date.map_or_else(
            || "cleared kill date".to_owned(),
            |d| format!("set kill date to {}", d.format("%m/%d/%Y")),
        );
        self.control_task(target, &[SessionField::KillDate(date)], directive, &description)
            .await
    }

    /// Update (or clear) the working-hours window on the server and the
    /// agent.
    ///
    /// # Errors
    ///
    /// Same contract as [`Dispatcher::task_sleep`].
    pub async fn task_working_hours(
        &self,
        target: &TaskTarget,
        hours: Option<WorkingHours>,
    ) -> Result<FanoutReport> {
        let directive = hours.map_or_else(
            || control_directive("working_hours="),
            |wh| control_directive(&format!("working_hours={}", wh.render())),
        );
        let description = hours.map_or_else(
            || "cleared working hours".to_owned(),
            |wh| format!("set working hours to {}", wh.render()),
        );
        self.control_task(target, &[SessionField::WorkingHours(hours)], directive, &description)
            .await
    }

    /// Task the agent(s) to terminate. The session record stays until the
    /// operator removes it explicitly.
    ///
    /// # Errors
    ///
    /// Same contract as [`Dispatcher::task_sleep`].
    pub async fn task_kill(&self, target: &TaskTarget) -> Result<FanoutReport> {
        self.control_task(target, &[], b"EXIT".to_vec(), "tasked to exit")
            .await
    }

    async fn control_task(
        &self,
        target: &TaskTarget,
        fields: &[SessionField],
        payload: Vec<u8>,
        description: &str,
    ) -> Result<FanoutReport> {
        let sessions = self.resolve_targets(target).await?;
        let fan_out = matches!(target, TaskTarget::All);
        let mut report = FanoutReport::default();
        for session in sessions {
            match self.control_one(&session, fields, payload.clone()).await {
                Ok(()) => {
                    self.bus.publish(
                        EventSource::Tasking,
                        format!("agent {}: {description}", session.name),
                    );
                    report.tasked.push(session.id);
                }
                Err(err) if fan_out => {
                    let failure = format!("session {}: {err}", session.id);
                    self.bus.publish(EventSource::Tasking, failure.clone());
                    report.failures.push(failure);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    async fn control_one(&self, session: &Session, fields: &[SessionField], payload: Vec<u8>) -> Result<()> {
        for field in fields {
            self.registry.set_field(&session.id, field.clone()).await?;
        }
        self.queue
            .enqueue(&session.id, Task::new(TaskCommand::plain(TaskKind::RunInline), payload))
            .await;
        Ok(())
    }

    /// Return and clear the pending tasks for a communicating session.
    pub async fn drain_for(&self, session_id: &str) -> Vec<Task> {
        let tasks = self.queue.drain(session_id).await;
        if !tasks.is_empty() {
            debug!(session = session_id, count = tasks.len(), "delivering tasks");
            self.bus.publish(
                EventSource::Tasking,
                format!("delivered {} task(s) to agent {session_id}", tasks.len()),
            );
        }
        tasks
    }

    /// Seed a newly registered session's queue from the autorun template.
    pub async fn apply_autorun(&self, session_id: &str) {
        if self.queue.seed_autorun(session_id).await {
            self.bus.publish(
                EventSource::Tasking,
                format!("applied autorun task to new agent {session_id}"),
            );
        }
    }

    /// Discard pending tasks without dispatch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown single-session target.
    pub async fn clear(&self, target: &TaskTarget) -> Result<()> {
        match target {
            TaskTarget::Session(name_or_id) => {
                let session = self.registry.resolve(name_or_id).await?;
                self.queue.clear(&session.id).await;
                self.bus.publish(
                    EventSource::Tasking,
                    format!("cleared pending tasks for agent {}", session.name),
                );
            }
            TaskTarget::All => {
                self.queue.clear_all().await;
                self.bus
                    .publish(EventSource::Tasking, "cleared pending tasks for all agents");
            }
            TaskTarget::Autorun => {
                self.queue.clear_autorun().await;
                self.bus
                    .publish(EventSource::Tasking, "cleared global autorun task");
            }
        }
        Ok(())
    }

    /// Record one result fragment for a session, appending the assembled
    /// output to the session's result buffer once complete.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an inconsistent fragment, or
    /// `AppError::NotFound` if the session vanished.
    pub async fn record_result(&self, session_id: &str, fragment: ResultFragment) -> Result<()> {
        let key = fragment.key.clone();
        let Some(output) = self.queue.results.ingest(session_id, fragment).await? else {
            return Ok(());
        };
        self.repo.append_result(session_id, &output).await?;
        self.bus.publish(
            EventSource::Tasking,
            format!(
                "agent {session_id} returned results for task {key} ({} bytes)",
                output.len()
            ),
        );
        Ok(())
    }
}
