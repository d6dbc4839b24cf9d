//! `MemoryComposer` gathers personal memory, app memory, documents and
//! side-context for one turn and renders them for the prompt.
//!
//! Best-effort throughout: every source is fetched independently and a
//! failing source contributes nothing. `compose` never returns an error.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;

use cg_contextpack::injection;
use cg_domain::error::Result;
use cg_domain::memory::MemoryItem;
use cg_domain::trace::TraceEvent;

use crate::provider::MemoryStore;
use crate::types::{ComposeRequest, ComposedMemory, DocumentSearchRequest};

pub struct MemoryComposer {
    store: Arc<dyn MemoryStore>,
}

impl MemoryComposer {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub async fn compose(&self, req: &ComposeRequest) -> ComposedMemory {
        let principal = req.scope.principal().map(str::to_owned);
        let app_id = req.scope.app_id.clone();
        let app_page = req.page_size.div_ceil(2);
        let now = Utc::now();
        let until = now + Duration::days(req.calendar_days.max(0));

        let personal = async {
            match principal.as_deref() {
                Some(p) if req.page_size > 0 => {
                    Some(self.store.personal_memories(p, &req.thread_id, req.page_size).await)
                }
                _ => None,
            }
        };
        let app = async {
            match app_id.as_deref() {
                Some(a) if app_page > 0 => Some(self.store.app_memories(a, app_page).await),
                _ => None,
            }
        };
        let documents = async {
            if req.document_limit == 0 || req.query.trim().is_empty() {
                return None;
            }
            Some(
                self.store
                    .search_documents(DocumentSearchRequest {
                        scope: req.scope.clone(),
                        query: req.query.clone(),
                        limit: req.document_limit,
                    })
                    .await,
            )
        };
        let calendar = async {
            match principal.as_deref() {
                Some(p) => Some(self.store.calendar_events(p, now, until).await),
                None => None,
            }
        };
        let knowledge = async {
            match app_id.as_deref() {
                Some(a) => Some(self.store.app_knowledge(a).await),
                None => None,
            }
        };

        let (personal, app, documents, calendar, knowledge) =
            tokio::join!(personal, app, documents, calendar, knowledge);

        let mut failed = 0usize;
        let personal = settle("personal", &req.thread_id, personal, &mut failed);
        let app = settle("app", &req.thread_id, app, &mut failed);
        let documents = settle("documents", &req.thread_id, documents, &mut failed);
        let calendar = settle("calendar", &req.thread_id, calendar, &mut failed);
        let knowledge = settle("knowledge", &req.thread_id, knowledge, &mut failed);

        let personal_count = personal.len();
        let memories = merge_disjoint(personal, app);
        let app_count = memories.len() - personal_count;

        TraceEvent::MemoryComposed {
            principal: principal.unwrap_or_default(),
            page_size: req.page_size,
            personal: personal_count,
            app: app_count,
            failed_sources: failed,
        }
        .emit();

        let mut side_context = injection::render_calendar(&calendar);
        side_context.push_str(&injection::render_knowledge(&knowledge));

        ComposedMemory {
            prompt_text: injection::render_memories(&memories),
            used_memory_ids: memories.iter().map(|m| m.id.clone()).collect(),
            memories,
            documents,
            calendar,
            knowledge,
            side_context,
        }
    }
}

/// Unwrap one source's outcome, logging and counting failures.
fn settle<T>(
    source: &str,
    thread_id: &str,
    outcome: Option<Result<Vec<T>>>,
    failed: &mut usize,
) -> Vec<T> {
    match outcome {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            *failed += 1;
            warn!(source, thread_id, error = %e, "memory source failed");
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Personal first, then app memories not already present.
fn merge_disjoint(personal: Vec<MemoryItem>, app: Vec<MemoryItem>) -> Vec<MemoryItem> {
    let mut seen: HashSet<String> = personal.iter().map(|m| m.id.clone()).collect();
    let mut out = personal;
    for m in app {
        if seen.insert(m.id.clone()) {
            out.push(m);
        }
    }
    out
}
