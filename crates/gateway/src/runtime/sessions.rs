//! Registry of live stream sessions.
//!
//! Each dispatched turn registers one session with its own
//! [`CancellationToken`]. A session leaves the registry on its first
//! terminal transition, so `complete` and `cancel` race on a single
//! mutex-guarded removal and exactly one of them wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use cg_domain::error::{Error, Result};
use cg_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Streaming,
    Completed,
    Cancelled,
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Errored
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match self {
            SessionState::Created => next != SessionState::Created,
            SessionState::Streaming => next.is_terminal(),
            _ => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamSession {
    recipient: String,
    thread_id: String,
    state: SessionState,
    created_at: DateTime<Utc>,
    /// Last state change or provider event. The sweeper keys on this.
    last_activity: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Public view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub thread_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct StreamSessionRegistry {
    sessions: Mutex<HashMap<String, StreamSession>>,
}

impl StreamSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session in `Created`. Ids are unique among live
    /// sessions.
    pub fn register(
        &self,
        session_id: &str,
        recipient: &str,
        thread_id: &str,
    ) -> Result<CancellationToken> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session_id) {
            return Err(Error::Validation(format!(
                "session {session_id} is already live"
            )));
        }
        let cancel = CancellationToken::new();
        let now = Utc::now();
        sessions.insert(
            session_id.to_owned(),
            StreamSession {
                recipient: recipient.to_owned(),
                thread_id: thread_id.to_owned(),
                state: SessionState::Created,
                created_at: now,
                last_activity: now,
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    pub fn mark_streaming(&self, session_id: &str) -> bool {
        self.transition(session_id, SessionState::Streaming)
    }

    /// Claim completion. Returns `false` when the session was already
    /// cancelled, failed or swept; the caller must then persist nothing.
    pub fn complete(&self, session_id: &str) -> bool {
        self.transition(session_id, SessionState::Completed)
    }

    pub fn fail(&self, session_id: &str) -> bool {
        self.transition(session_id, SessionState::Errored)
    }

    /// Cancel on behalf of `requester`. Only the session's recipient may
    /// stop it.
    pub fn cancel(&self, session_id: &str, requester: &str) -> Result<()> {
        let token = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
            if session.recipient != requester {
                return Err(Error::Forbidden("session belongs to another caller".into()));
            }
            let from = session.state;
            let removed = sessions.remove(session_id);
            emit_transition(session_id, from, SessionState::Cancelled);
            removed.map(|s| s.cancel)
        };
        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }

    /// Record provider activity on a live session. Unknown ids are ignored.
    pub fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().get(session_id).map(|s| s.state)
    }

    /// Live sessions of `recipient`, oldest first.
    pub fn list(&self, recipient: &str) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, s)| s.recipient == recipient)
            .map(|(id, s)| SessionInfo {
                session_id: id.clone(),
                thread_id: s.thread_id.clone(),
                state: s.state,
                created_at: s.created_at,
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel and drop every session idle for longer than `max_idle`.
    /// Returns how many were swept.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::zero());
        self.sweep_before(cutoff)
    }

    fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<(String, StreamSession)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.last_activity < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };
        for (id, session) in &stale {
            emit_transition(id, session.state, SessionState::Cancelled);
            session.cancel.cancel();
        }
        if !stale.is_empty() {
            tracing::info!(swept = stale.len(), "abandoned stream sessions cancelled");
        }
        stale.len()
    }

    /// Periodically sweep abandoned sessions until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep(max_idle);
                    }
                }
            }
        })
    }

    fn transition(&self, session_id: &str, to: SessionState) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        let from = session.state;
        if !from.can_transition_to(to) {
            tracing::warn!(
                session_id,
                from = from.as_str(),
                to = to.as_str(),
                "rejected session transition"
            );
            return false;
        }
        if to.is_terminal() {
            sessions.remove(session_id);
        } else {
            session.state = to;
            session.last_activity = Utc::now();
        }
        emit_transition(session_id, from, to);
        true
    }
}

fn emit_transition(session_id: &str, from: SessionState, to: SessionState) {
    TraceEvent::SessionTransition {
        session_id: session_id.to_owned(),
        from: from.as_str().to_owned(),
        to: to.as_str().to_owned(),
    }
    .emit();
}
