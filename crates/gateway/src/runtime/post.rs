//! Side effects after a completed turn.
//!
//! Reinforcement, usage recording and enrichment all run detached from
//! the response. Their failures are logged and never reach the caller.

use std::sync::Arc;

use cg_domain::conversation::Thread;
use cg_domain::stream::Usage;
use cg_domain::tenant::TenantConfig;
use cg_domain::trace::TraceEvent;
use cg_memory::MemoryStore;

use crate::collab::rate_limit::RateLimiter;

use super::enrichment::{EnrichmentJob, Enricher};

#[derive(Debug, Clone)]
pub struct CompletedTurn {
    /// Doubles as the reinforcement key, so a replayed turn reinforces
    /// nothing twice.
    pub session_id: String,
    pub thread: Thread,
    pub tenant: TenantConfig,
    pub principal: String,
    pub used_memory_ids: Vec<String>,
    pub usage: Usage,
}

pub struct PostCompletion {
    memory: Arc<dyn MemoryStore>,
    limiter: Arc<dyn RateLimiter>,
    enricher: Arc<Enricher>,
}

impl PostCompletion {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        limiter: Arc<dyn RateLimiter>,
        enricher: Arc<Enricher>,
    ) -> Self {
        Self {
            memory,
            limiter,
            enricher,
        }
    }

    /// Spawn every post-completion effect. The returned handle resolves
    /// once reinforcement and usage recording are done; enrichment keeps
    /// running on its own.
    pub fn run(&self, turn: CompletedTurn) -> tokio::task::JoinHandle<()> {
        let memory = Arc::clone(&self.memory);
        let limiter = Arc::clone(&self.limiter);
        let enricher = Arc::clone(&self.enricher);

        tokio::spawn(async move {
            if !turn.used_memory_ids.is_empty() {
                match memory.reinforce(&turn.session_id, &turn.used_memory_ids).await {
                    Ok(n) => TraceEvent::MemoryReinforced {
                        reinforcement_key: turn.session_id.clone(),
                        ids: n,
                    }
                    .emit(),
                    Err(e) => tracing::warn!(
                        session_id = %turn.session_id,
                        error = %e,
                        "memory reinforcement failed"
                    ),
                }
            }

            limiter
                .record_usage(&turn.tenant.tenant_id, u64::from(turn.usage.total_tokens))
                .await;

            enricher.maybe_spawn(EnrichmentJob {
                thread: turn.thread,
                tenant: turn.tenant,
                principal: turn.principal,
            });
        })
    }
}
