//! The `MemoryStore` trait defines the interface for all memory and
//! knowledge backends (REST, in-memory, test doubles).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cg_domain::error::Result;
use cg_domain::memory::{CalendarEvent, DocumentSnippet, KnowledgeEntry, MemoryItem};

use crate::types::{DocumentSearchRequest, MemoryIngestRequest};

/// Abstraction over the memory & knowledge service.
///
/// Reads are expected to be cheap and side-effect free. The only write on
/// the request path is [`MemoryStore::reinforce`].
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Personal memories of `principal`, excluding those learned in
    /// `exclude_thread_id`. Most important first.
    async fn personal_memories(
        &self,
        principal: &str,
        exclude_thread_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>>;

    /// Institutional memories of an application. Most important first.
    async fn app_memories(&self, app_id: &str, limit: usize) -> Result<Vec<MemoryItem>>;

    /// Retrieval-augmented document search, best match first.
    async fn search_documents(&self, req: DocumentSearchRequest) -> Result<Vec<DocumentSnippet>>;

    async fn calendar_events(
        &self,
        principal: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    async fn app_knowledge(&self, app_id: &str) -> Result<Vec<KnowledgeEntry>>;

    /// Bump the usage counter of every id by one.
    ///
    /// Idempotent per `reinforcement_key`: replaying a key is a no-op, so
    /// retries never double-count. Returns how many counters moved.
    async fn reinforce(&self, reinforcement_key: &str, ids: &[String]) -> Result<usize>;

    /// Store a new memory (used by the `save_memory` tool and enrichment).
    async fn ingest(&self, req: MemoryIngestRequest) -> Result<MemoryItem>;
}
