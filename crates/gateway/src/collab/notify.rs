use serde::Serialize;
use tokio::sync::broadcast;

/// Events fanned out to a recipient's devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    Chunk {
        session_id: String,
        thread_id: String,
        text: String,
        /// True for reasoning chunks.
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        thinking: bool,
    },
    Completed {
        session_id: String,
        thread_id: String,
        message_id: String,
    },
    Cancelled {
        session_id: String,
        thread_id: String,
    },
    Failed {
        session_id: String,
        thread_id: String,
        code: String,
    },
}

/// Fire-and-forget fan-out. `publish` must not block; delivery is never
/// confirmed.
pub trait Notifier: Send + Sync {
    fn publish(&self, recipient: &str, event: NotifyEvent);
}

/// In-process notifier backed by a broadcast channel. Slow subscribers
/// lose the oldest events.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<(String, NotifyEvent)>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, NotifyEvent)> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, recipient: &str, event: NotifyEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send((recipient.to_owned(), event));
    }
}
