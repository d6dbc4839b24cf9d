//! Per-session chunk forwarding.
//!
//! The provider task pushes chunks into a bounded channel; a separate
//! consumer task publishes them to the notifier and the caller's event
//! channel one at a time, pausing `min_interval` between chunks. A full
//! channel applies backpressure to the provider read. Cancellation stops
//! the consumer and closes the channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collab::notify::{NotifyEvent, Notifier};

use super::events::TurnEvent;

#[derive(Debug, Clone)]
pub enum Chunk {
    Text(String),
    Thinking(String),
    /// Passed to the caller in order with the text, without notification
    /// or pacing.
    Event(TurnEvent),
}

/// Where one session's chunks go.
#[derive(Debug, Clone)]
pub struct ForwardRoute {
    pub session_id: String,
    pub thread_id: String,
    pub recipient: String,
}

pub struct ChunkForwarder {
    tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChunkForwarder {
    pub fn spawn(
        route: ForwardRoute,
        notifier: Arc<dyn Notifier>,
        events: mpsc::Sender<TurnEvent>,
        capacity: usize,
        min_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(consume(
            rx,
            route,
            notifier,
            events,
            min_interval,
            cancel.clone(),
        ));
        Self { tx, cancel, task }
    }

    /// Queue one chunk. Returns `false` once the session is cancelled or
    /// the consumer has stopped.
    pub async fn send(&self, chunk: Chunk) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(chunk) => sent.is_ok(),
        }
    }

    /// Close the channel and wait until every queued chunk is delivered.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "chunk forwarder task failed");
        }
    }
}

async fn consume(
    mut rx: mpsc::Receiver<Chunk>,
    route: ForwardRoute,
    notifier: Arc<dyn Notifier>,
    events: mpsc::Sender<TurnEvent>,
    min_interval: Duration,
    cancel: CancellationToken,
) {
    let mut first = true;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(c) => c,
                None => break,
            },
        };
        let (text, thinking) = match chunk {
            Chunk::Text(t) => (t, false),
            Chunk::Thinking(t) => (t, true),
            Chunk::Event(ev) => {
                let _ = events.send(ev).await;
                continue;
            }
        };
        if !first && !min_interval.is_zero() {
            tokio::time::sleep(min_interval).await;
        }
        first = false;
        if cancel.is_cancelled() {
            break;
        }

        notifier.publish(
            &route.recipient,
            NotifyEvent::Chunk {
                session_id: route.session_id.clone(),
                thread_id: route.thread_id.clone(),
                text: text.clone(),
                thinking,
            },
        );
        let event = if thinking {
            TurnEvent::Thinking { text }
        } else {
            TurnEvent::Delta { text }
        };
        // A disconnected caller keeps the session alive for other devices.
        let _ = events.send(event).await;
    }
    rx.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::notify::BroadcastNotifier;

    fn route() -> ForwardRoute {
        ForwardRoute {
            session_id: "s1".into(),
            thread_id: "th".into(),
            recipient: "m1".into(),
        }
    }

    #[tokio::test]
    async fn delivers_in_order_to_both_sinks() {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut sub = notifier.subscribe();
        let (etx, mut erx) = mpsc::channel(16);
        let fwd = ChunkForwarder::spawn(
            route(),
            notifier.clone(),
            etx,
            2,
            Duration::from_millis(1),
            CancellationToken::new(),
        );
        for t in ["a", "b", "c"] {
            assert!(fwd.send(Chunk::Text(t.into())).await);
        }
        assert!(fwd.send(Chunk::Thinking("hmm".into())).await);
        fwd.finish().await;

        let mut texts = Vec::new();
        while let Ok(ev) = erx.try_recv() {
            match ev {
                TurnEvent::Delta { text } => texts.push(text),
                TurnEvent::Thinking { text } => texts.push(format!("~{text}")),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(texts, vec!["a", "b", "c", "~hmm"]);

        let (recipient, first) = sub.recv().await.unwrap();
        assert_eq!(recipient, "m1");
        assert!(matches!(first, NotifyEvent::Chunk { ref text, .. } if text == "a"));
    }

    #[tokio::test]
    async fn cancellation_stops_forwarding() {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let (etx, _erx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let fwd = ChunkForwarder::spawn(
            route(),
            notifier,
            etx,
            4,
            Duration::ZERO,
            cancel.clone(),
        );
        cancel.cancel();
        assert!(!fwd.send(Chunk::Text("late".into())).await);
        fwd.finish().await;
    }
}
