//! Task model and command kinds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Execution strategy for a task on the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Detached, non-blocking background job.
    Job,
    /// Written to disk on the agent before execution.
    RunFromDisk,
    /// Executed inline in the agent's foreground.
    RunInline,
}

/// Command variant delivered on the wire: a [`TaskKind`] plus whether the
/// server expects a file-bearing result (`_SAVE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCommand {
    /// Execution strategy.
    pub kind: TaskKind,
    /// Whether the result is routed to an output artifact on the server.
    pub save: bool,
}

impl TaskCommand {
    /// Plain (non-save) command for a kind.
    #[must_use]
    pub fn plain(kind: TaskKind) -> Self {
        Self { kind, save: false }
    }

    /// Stable wire string for this command.
    #[must_use]
    pub fn wire(self) -> &'static str {
        match (self.kind, self.save) {
            (TaskKind::Job, false) => "TASK_CMD_JOB",
            (TaskKind::Job, true) => "TASK_CMD_JOB_SAVE",
            (TaskKind::RunFromDisk, false) => "TASK_CMD_RUN_DISK",
            (TaskKind::RunFromDisk, true) => "TASK_CMD_RUN_DISK_SAVE",
            (TaskKind::RunInline, false) => "TASK_CMD_RUN",
            (TaskKind::RunInline, true) => "TASK_CMD_RUN_SAVE",
        }
    }

    /// Parse a wire string back into a command.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a string outside the closed set.
    pub fn from_wire(raw: &str) -> Result<Self> {
        let command = match raw {
            "TASK_CMD_JOB" => Self { kind: TaskKind::Job, save: false },
            "TASK_CMD_JOB_SAVE" => Self { kind: TaskKind::Job, save: true },
            "TASK_CMD_RUN_DISK" => Self { kind: TaskKind::RunFromDisk, save: false },
            "TASK_CMD_RUN_DISK_SAVE" => Self { kind: TaskKind::RunFromDisk, save: true },
            "TASK_CMD_RUN" => Self { kind: TaskKind::RunInline, save: false },
            "TASK_CMD_RUN_SAVE" => Self { kind: TaskKind::RunInline, save: true },
            other => return Err(AppError::Validation(format!("unknown task command '{other}'"))),
        };
        Ok(command)
    }
}

/// An ordered, opaque instruction queued against exactly one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Correlation id echoed back by result-bearing commands.
    pub id: String,
    /// Command variant.
    pub command: TaskCommand,
    /// Opaque payload blob.
    pub payload: Vec<u8>,
}

impl Task {
    /// Construct a task with a fresh correlation id.
    #[must_use]
    pub fn new(command: TaskCommand, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string().chars().take(8).collect(),
            command,
            payload,
        }
    }
}

/// One piece of a (possibly multi-part) task result returned by an agent.
///
/// Large output arrives as a sequence of fragments sharing a correlation
/// `key`, ordered by `seq` out of `total`. Single-part results use
/// `seq = 0`, `total = 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFragment {
    /// Correlation key tying fragments of one result together; matches the
    /// originating task id.
    pub key: String,
    /// Zero-based position of this fragment.
    pub seq: u32,
    /// Total number of fragments in the result.
    pub total: u32,
    /// Decoded output carried by this fragment.
    pub data: String,
}
