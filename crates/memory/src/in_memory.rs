//! Process-local [`MemoryStore`] for development and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use cg_domain::error::Result;
use cg_domain::memory::{
    CalendarEvent, DocumentSnippet, KnowledgeEntry, MemoryItem, MemoryScope,
};

use crate::provider::MemoryStore;
use crate::types::{DocumentSearchRequest, MemoryIngestRequest};

#[derive(Default)]
struct Inner {
    /// (owner, item). Owner is a user/guest id or an app id by scope.
    memories: Vec<(String, MemoryItem)>,
    /// (owner, document). Owner is a principal or an app id.
    documents: Vec<(String, StoredDocument)>,
    calendar: HashMap<String, Vec<CalendarEvent>>,
    knowledge: HashMap<String, Vec<KnowledgeEntry>>,
    applied_keys: HashSet<String>,
}

struct StoredDocument {
    id: String,
    title: String,
    text: String,
}

/// Thread-safe in-memory store. All reads copy out of the lock.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed memory item (seeding and tests).
    pub fn insert_memory(&self, owner: impl Into<String>, item: MemoryItem) {
        self.inner.write().memories.push((owner.into(), item));
    }

    pub fn insert_document(
        &self,
        owner: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.inner.write().documents.push((
            owner.into(),
            StoredDocument {
                id: id.into(),
                title: title.into(),
                text: text.into(),
            },
        ));
    }

    pub fn insert_event(&self, principal: impl Into<String>, event: CalendarEvent) {
        self.inner
            .write()
            .calendar
            .entry(principal.into())
            .or_default()
            .push(event);
    }

    pub fn insert_knowledge(&self, app_id: impl Into<String>, entry: KnowledgeEntry) {
        self.inner
            .write()
            .knowledge
            .entry(app_id.into())
            .or_default()
            .push(entry);
    }

    /// Current usage counter of a memory, if it exists.
    pub fn usage_count(&self, id: &str) -> Option<u32> {
        self.inner
            .read()
            .memories
            .iter()
            .find(|(_, m)| m.id == id)
            .map(|(_, m)| m.usage_count)
    }

    fn ranked(&self, filter: impl Fn(&str, &MemoryItem) -> bool, limit: usize) -> Vec<MemoryItem> {
        let inner = self.inner.read();
        let mut items: Vec<MemoryItem> = inner
            .memories
            .iter()
            .filter(|(owner, m)| filter(owner, m))
            .map(|(_, m)| m.clone())
            .collect();
        items.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        items.truncate(limit);
        items
    }
}

/// Share of query terms found in `text`, in `[0, 1]`.
fn term_overlap(query: &str, text: &str) -> f32 {
    let text = text.to_lowercase();
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| t.len() > 2)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn personal_memories(
        &self,
        principal: &str,
        exclude_thread_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        Ok(self.ranked(
            |owner, m| {
                owner == principal
                    && m.scope == MemoryScope::User
                    && m.source_thread_id.as_deref() != Some(exclude_thread_id)
            },
            limit,
        ))
    }

    async fn app_memories(&self, app_id: &str, limit: usize) -> Result<Vec<MemoryItem>> {
        Ok(self.ranked(
            |owner, m| owner == app_id && m.scope == MemoryScope::App,
            limit,
        ))
    }

    async fn search_documents(&self, req: DocumentSearchRequest) -> Result<Vec<DocumentSnippet>> {
        let inner = self.inner.read();
        let owners: Vec<&str> = [req.scope.principal(), req.scope.app_id.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        let mut hits: Vec<DocumentSnippet> = inner
            .documents
            .iter()
            .filter(|(owner, _)| owners.contains(&owner.as_str()))
            .filter_map(|(_, d)| {
                let score = term_overlap(&req.query, &format!("{} {}", d.title, d.text));
                (score > 0.0).then(|| DocumentSnippet {
                    document_id: d.id.clone(),
                    title: d.title.clone(),
                    text: d.text.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(req.limit);
        Ok(hits)
    }

    async fn calendar_events(
        &self,
        principal: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let inner = self.inner.read();
        let mut events: Vec<CalendarEvent> = inner
            .calendar
            .get(principal)
            .map(|evs| {
                evs.iter()
                    .filter(|e| e.starts_at >= from && e.starts_at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.starts_at);
        Ok(events)
    }

    async fn app_knowledge(&self, app_id: &str) -> Result<Vec<KnowledgeEntry>> {
        Ok(self.inner.read().knowledge.get(app_id).cloned().unwrap_or_default())
    }

    async fn reinforce(&self, reinforcement_key: &str, ids: &[String]) -> Result<usize> {
        let mut inner = self.inner.write();
        if !inner.applied_keys.insert(reinforcement_key.to_owned()) {
            return Ok(0);
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut bumped = 0;
        for (_, m) in inner.memories.iter_mut() {
            if wanted.contains(m.id.as_str()) {
                m.usage_count += 1;
                bumped += 1;
            }
        }
        Ok(bumped)
    }

    async fn ingest(&self, req: MemoryIngestRequest) -> Result<MemoryItem> {
        let item = MemoryItem {
            id: uuid::Uuid::new_v4().to_string(),
            content: req.content,
            category: req.category,
            importance: req.importance.min(10),
            scope: req.scope,
            source_thread_id: req.source_thread_id,
            usage_count: 0,
            created_at: Utc::now(),
        };
        self.inner.write().memories.push((req.owner, item.clone()));
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::memory::MemoryCategory;
    use crate::types::MemoryScopeKey;

    fn item(id: &str, importance: u8, thread: Option<&str>) -> MemoryItem {
        MemoryItem {
            id: id.into(),
            content: format!("memory {id}"),
            category: MemoryCategory::Fact,
            importance,
            scope: MemoryScope::User,
            source_thread_id: thread.map(Into::into),
            usage_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn personal_memories_exclude_current_thread() {
        let store = InMemoryStore::new();
        store.insert_memory("u1", item("a", 5, Some("t1")));
        store.insert_memory("u1", item("b", 9, Some("t2")));
        store.insert_memory("u2", item("c", 9, None));

        let got = store.personal_memories("u1", "t1", 10).await.unwrap();
        let ids: Vec<_> = got.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn reinforcement_is_idempotent_per_key() {
        let store = InMemoryStore::new();
        store.insert_memory("u1", item("a", 5, None));
        let ids = vec!["a".to_string()];

        assert_eq!(store.reinforce("session-1", &ids).await.unwrap(), 1);
        // Retry of the same reinforcement.
        assert_eq!(store.reinforce("session-1", &ids).await.unwrap(), 0);
        assert_eq!(store.reinforce("session-2", &ids).await.unwrap(), 1);
        assert_eq!(store.usage_count("a"), Some(2));
    }

    #[tokio::test]
    async fn document_search_ranks_by_overlap() {
        let store = InMemoryStore::new();
        store.insert_document("app", "d1", "Refund policy", "Refunds are issued within 14 days");
        store.insert_document("app", "d2", "Shipping", "Refund shipping costs are not covered");
        store.insert_document("other", "d3", "Refund policy", "not visible");

        let hits = store
            .search_documents(DocumentSearchRequest {
                scope: MemoryScopeKey { app_id: Some("app".into()), ..Default::default() },
                query: "refund policy".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "d1");
    }
}
