use serde::{Deserialize, Serialize};

/// Kinds of real-time events delivered through the notification fan-out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Broadcast,
    TaskAssigned,
    TaskUpdated,
    Connected,
    Heartbeat,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::TaskAssigned => write!(f, "task_assigned"),
            Self::TaskUpdated => write!(f, "task_updated"),
            Self::Connected => write!(f, "connected"),
            Self::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// A notification event: a kind plus a JSON payload.
/// Delivery is best-effort; events are never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }

    /// Emitted as the first event on a fresh subscription.
    pub fn connected(agent: &str) -> Self {
        Self::new(EventKind::Connected, serde_json::json!({ "agent": agent }))
    }

    /// Synthetic keepalive for idle streams.
    pub fn heartbeat() -> Self {
        Self::new(EventKind::Heartbeat, serde_json::json!({}))
    }
}
