use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use roundtable_core::Event;

use crate::backend::NotificationBackend;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Long-lived per-agent event reader for streaming transports.
///
/// Opening the stream subscribes the agent and queues a `connected` event so
/// the transport can acknowledge the stream immediately. When no event
/// arrives within the heartbeat interval, a synthetic `heartbeat` event is
/// yielded so clients can detect dead connections. Dropping the stream
/// releases the subscription; transports hold at most one stream per agent.
pub struct EventStream {
    agent: String,
    rx: mpsc::Receiver<Event>,
    backend: Arc<dyn NotificationBackend>,
    heartbeat: Duration,
}

impl EventStream {
    pub fn open(backend: Arc<dyn NotificationBackend>, agent: &str) -> Self {
        Self::with_heartbeat(backend, agent, HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat(
        backend: Arc<dyn NotificationBackend>,
        agent: &str,
        heartbeat: Duration,
    ) -> Self {
        let rx = backend.subscribe(agent);
        backend.notify(agent, Event::connected(agent));
        Self {
            agent: agent.to_string(),
            rx,
            backend,
            heartbeat,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Next event, or a heartbeat if the queue stays idle past the interval.
    /// Returns `None` once the subscription has been replaced or removed.
    pub async fn next(&mut self) -> Option<Event> {
        match tokio::time::timeout(self.heartbeat, self.rx.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => None,
            Err(_elapsed) => Some(Event::heartbeat()),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Drain leftovers first: a disconnected receiver means a newer
        // subscription replaced this one and owns the registry slot.
        loop {
            match self.rx.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
                Err(mpsc::error::TryRecvError::Empty) => break,
            }
        }
        self.backend.unsubscribe(&self.agent);
    }
}
