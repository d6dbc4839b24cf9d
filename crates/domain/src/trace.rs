use serde::Serialize;

/// Structured trace events emitted across all ConvoGate crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ContextBuilt {
        thread_id: String,
        history_total: usize,
        history_kept: usize,
        memory_items: usize,
        document_snippets: usize,
        estimated_tokens: usize,
    },
    BudgetEnforced {
        ceiling: usize,
        before: usize,
        after: usize,
        steps: Vec<String>,
        within_ceiling: bool,
    },
    MemoryComposed {
        principal: String,
        page_size: usize,
        personal: usize,
        app: usize,
        failed_sources: usize,
    },
    MemoryCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    ProviderResolved {
        agent: String,
        provider: String,
        model: String,
        credential_source: String,
        rerouted: bool,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmRetry {
        provider: String,
        attempt: u32,
        reason: String,
    },
    SessionTransition {
        session_id: String,
        from: String,
        to: String,
    },
    ToolReconciled {
        session_id: String,
        tools: Vec<String>,
        followup_chars: usize,
    },
    MemoryReinforced {
        reinforcement_key: String,
        ids: usize,
    },
    EnrichmentRun {
        thread_id: String,
        kind: String,
        ok: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cg_event");
    }
}
