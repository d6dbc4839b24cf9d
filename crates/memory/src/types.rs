//! Request/response DTOs for the memory & knowledge backend.

use serde::{Deserialize, Serialize};

use cg_domain::memory::{
    CalendarEvent, DocumentSnippet, KnowledgeEntry, MemoryCategory, MemoryItem, MemoryScope,
};

// ── Reads ────────────────────────────────────────────────────────────

/// Who is asking, and where. Used to scope every read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryScopeKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl MemoryScopeKey {
    /// The personal-memory owner: the user, else the guest.
    pub fn principal(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.guest_id.as_deref())
    }
}

/// Input to [`crate::MemoryComposer::compose`].
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub scope: MemoryScopeKey,
    pub thread_id: String,
    /// Memories to request per pool; see `MemoryConfig::page_size_for`.
    pub page_size: usize,
    /// Text used for document retrieval (normally the user's message).
    pub query: String,
    pub document_limit: usize,
    pub calendar_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSearchRequest {
    #[serde(flatten)]
    pub scope: MemoryScopeKey,
    pub query: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryListResponse {
    pub memories: Vec<MemoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSearchResponse {
    pub snippets: Vec<DocumentSnippet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarResponse {
    pub events: Vec<CalendarEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeResponse {
    pub entries: Vec<KnowledgeEntry>,
}

// ── Writes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryIngestRequest {
    /// Owner id: user/guest for `User` scope, app id for `App` scope.
    pub owner: String,
    pub scope: MemoryScope,
    pub content: String,
    pub category: MemoryCategory,
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforceRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforceResponse {
    /// Items whose counter was bumped. Zero for a replayed key.
    pub reinforced: usize,
}

// ── Composition result ───────────────────────────────────────────────

/// Everything the composer retrieved, plus the rendered prompt text.
#[derive(Debug, Clone, Default)]
pub struct ComposedMemory {
    pub memories: Vec<MemoryItem>,
    pub documents: Vec<DocumentSnippet>,
    pub calendar: Vec<CalendarEvent>,
    pub knowledge: Vec<KnowledgeEntry>,
    /// Memory lines grouped by category.
    pub prompt_text: String,
    /// Rendered calendar + app knowledge.
    pub side_context: String,
    pub used_memory_ids: Vec<String>,
}

impl ComposedMemory {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
            && self.documents.is_empty()
            && self.calendar.is_empty()
            && self.knowledge.is_empty()
    }
}
