//! Process-wide event bus.
//!
//! Every component that mutates shared state publishes a human-readable
//! notification here. Observers (console, audit log, API) subscribe to the
//! same channel. Delivery is in publish order; a subscriber that falls
//! behind observes a `Lagged` error on its receiver rather than stalling
//! the publisher. No persistence or replay.

use tokio::sync::broadcast;

/// Component that emitted an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Session registry: registrations, field changes, removals.
    Registry,
    /// Tasking queue and dispatcher: enqueues, drains, results.
    Tasking,
    /// Listener lifecycle manager: start, stop, delete.
    Listeners,
}

impl EventSource {
    /// Short label used when rendering events for an observer.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Tasking => "tasking",
            Self::Listeners => "listeners",
        }
    }
}

/// A single status notification broadcast to all observers.
#[derive(Debug, Clone)]
pub struct Event {
    /// Component that emitted the notification.
    pub source: EventSource,
    /// Human-readable message.
    pub message: String,
}

/// Cloneable handle to the process-wide broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given buffered capacity per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a notification to all current subscribers.
    ///
    /// Never blocks. A send with zero subscribers is not an error;
    /// the event is simply dropped.
    pub fn publish(&self, source: EventSource, message: impl Into<String>) {
        let _ = self.tx.send(Event {
            source,
            message: message.into(),
        });
    }

    /// Attach a new observer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of currently attached observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
