use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use cg_domain::conversation::{ConversationMessage, Thread};
use cg_domain::error::{Error, Result};

/// Fields enrichment may write back onto a thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadUpdate {
    pub thread_id: String,
    pub summary: Option<String>,
    pub mood: Option<String>,
}

/// Durable thread/message storage. Read-your-writes within a request is
/// all the orchestrator relies on.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>>;

    async fn get_message(&self, message_id: &str) -> Result<Option<ConversationMessage>>;

    async fn create_message(&self, message: ConversationMessage) -> Result<ConversationMessage>;

    async fn update_thread(&self, update: ThreadUpdate) -> Result<()>;

    /// Chronological, oldest first, at most `limit` of the newest messages.
    async fn list_messages(&self, thread_id: &str, limit: usize)
        -> Result<Vec<ConversationMessage>>;
}

#[derive(Default)]
struct Inner {
    threads: HashMap<String, Thread>,
    messages: HashMap<String, ConversationMessage>,
    /// thread id -> message ids in insertion order.
    order: HashMap<String, Vec<String>>,
}

/// Process-local [`ThreadStore`]. Not durable.
#[derive(Default)]
pub struct InMemoryThreadStore {
    inner: RwLock<Inner>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_thread(&self, thread: Thread) {
        self.inner.write().threads.insert(thread.id.clone(), thread);
    }

    /// Every stored message of `thread_id`, oldest first.
    pub fn messages(&self, thread_id: &str) -> Vec<ConversationMessage> {
        let inner = self.inner.read();
        inner
            .order
            .get(thread_id)
            .map(|ids| ids.iter().filter_map(|id| inner.messages.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        Ok(self.inner.read().threads.get(thread_id).cloned())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<ConversationMessage>> {
        Ok(self.inner.read().messages.get(message_id).cloned())
    }

    async fn create_message(&self, message: ConversationMessage) -> Result<ConversationMessage> {
        let mut inner = self.inner.write();
        let thread = inner
            .threads
            .get_mut(&message.thread_id)
            .ok_or_else(|| Error::NotFound(format!("thread {}", message.thread_id)))?;
        thread.message_count += 1;
        thread.updated_at = Utc::now();

        inner
            .order
            .entry(message.thread_id.clone())
            .or_default()
            .push(message.id.clone());
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn update_thread(&self, update: ThreadUpdate) -> Result<()> {
        let mut inner = self.inner.write();
        let thread = inner
            .threads
            .get_mut(&update.thread_id)
            .ok_or_else(|| Error::NotFound(format!("thread {}", update.thread_id)))?;
        if update.summary.is_some() {
            thread.summary = update.summary;
        }
        if update.mood.is_some() {
            thread.mood = update.mood;
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let all = self.messages(thread_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}
