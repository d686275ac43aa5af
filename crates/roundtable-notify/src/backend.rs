use dashmap::DashMap;
use tokio::sync::mpsc;

use roundtable_core::Event;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Delivery backend for real-time agent events.
///
/// All delivery is best-effort: events to unsubscribed agents vanish, and a
/// full queue drops the new event rather than blocking the producer. Offline
/// agents rely on polling the store instead. Subscriptions are process-local
/// and do not survive a restart.
pub trait NotificationBackend: Send + Sync {
    /// Create (or replace) the agent's event queue and return its receiver.
    fn subscribe(&self, agent: &str) -> mpsc::Receiver<Event>;

    /// Remove the agent's queue.
    fn unsubscribe(&self, agent: &str);

    fn is_connected(&self, agent: &str) -> bool;

    /// Enqueue an event for one agent. No-op if unsubscribed.
    fn notify(&self, agent: &str, event: Event);

    /// Enqueue an event for every subscribed agent except `exclude`.
    fn notify_all(&self, event: Event, exclude: Option<&str>);
}

/// Queue-based backend for streaming transports.
pub struct QueueBackend {
    queues: DashMap<String, mpsc::Sender<Event>>,
    capacity: usize,
}

impl QueueBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.queues.len()
    }

    fn enqueue(agent: &str, tx: &mpsc::Sender<Event>, event: Event) {
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(agent, kind = %dropped.kind, "event queue full, dropping event");
            }
            // Receiver side already gone; the slot is cleared on the next
            // subscribe/unsubscribe.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl Default for QueueBackend {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl NotificationBackend for QueueBackend {
    fn subscribe(&self, agent: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.queues.insert(agent.to_string(), tx);
        rx
    }

    fn unsubscribe(&self, agent: &str) {
        self.queues.remove(agent);
    }

    fn is_connected(&self, agent: &str) -> bool {
        self.queues.contains_key(agent)
    }

    fn notify(&self, agent: &str, event: Event) {
        if let Some(tx) = self.queues.get(agent) {
            Self::enqueue(agent, &tx, event);
        }
    }

    fn notify_all(&self, event: Event, exclude: Option<&str>) {
        for entry in self.queues.iter() {
            if Some(entry.key().as_str()) == exclude {
                continue;
            }
            Self::enqueue(entry.key(), entry.value(), event.clone());
        }
    }
}

/// Inert backend for transports whose clients poll the store.
pub struct NoopBackend;

impl NotificationBackend for NoopBackend {
    fn subscribe(&self, _agent: &str) -> mpsc::Receiver<Event> {
        // Sender is dropped immediately; the receiver never yields.
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn unsubscribe(&self, _agent: &str) {}

    fn is_connected(&self, _agent: &str) -> bool {
        false
    }

    fn notify(&self, _agent: &str, _event: Event) {}

    fn notify_all(&self, _event: Event, _exclude: Option<&str>) {}
}
