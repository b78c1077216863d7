//! Per-session ordered pending-task queues and the autorun template.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::models::task::{Task, TaskCommand};

use super::results::ResultCollector;

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<String, Vec<Task>>,
    autorun: Option<(TaskCommand, Vec<u8>)>,
}

/// In-memory tasking queue shared by all listeners and the operator
/// surface. Task order per session is enqueue order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    /// Reassembly surface for multi-part results.
    pub results: ResultCollector,
}

impl TaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to a session's pending queue.
    pub async fn enqueue(&self, session_id: &str, task: Task) {
        self.state
            .lock()
            .await
            .pending
            .entry(session_id.to_owned())
            .or_default()
            .push(task);
    }

    /// Return and clear a session's pending queue, in enqueue order.
    pub async fn drain(&self, session_id: &str) -> Vec<Task> {
        self.state
            .lock()
            .await
            .pending
            .remove(session_id)
            .unwrap_or_default()
    }

    /// Discard a session's pending tasks without dispatch.
    pub async fn clear(&self, session_id: &str) {
        self.state.lock().await.pending.remove(session_id);
    }

    /// Discard every session's pending tasks.
    pub async fn clear_all(&self) {
        self.state.lock().await.pending.clear();
    }

    /// Number of tasks pending for a session.
    pub async fn pending_count(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .await
            .pending
            .get(session_id)
            .map_or(0, Vec::len)
    }

    /// Store the autorun template applied to every future new session.
    pub async fn set_autorun(&self, command: TaskCommand, payload: Vec<u8>) {
        self.state.lock().await.autorun = Some((command, payload));
    }

    /// Clear the autorun template.
    pub async fn clear_autorun(&self) {
        self.state.lock().await.autorun = None;
    }

    /// Current autorun template, if set.
    pub async fn autorun(&self) -> Option<(TaskCommand, Vec<u8>)> {
        self.state.lock().await.autorun.clone()
    }

    /// Seed a newly registered session's queue from the autorun template.
    ///
    /// Returns whether a task was enqueued. Existing sessions are never
    /// touched by the template.
    pub async fn seed_autorun(&self, session_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some((command, payload)) = state.autorun.clone() else {
            return false;
        };
        state
            .pending
            .entry(session_id.to_owned())
            .or_default()
            .push(Task::new(command, payload));
        true
    }

    /// Drop all queue state held for a session (pending tasks and any
    /// incomplete multi-part results).
    pub async fn remove_session(&self, session_id: &str) {
        self.state.lock().await.pending.remove(session_id);
        self.results.remove_session(session_id).await;
    }
}
