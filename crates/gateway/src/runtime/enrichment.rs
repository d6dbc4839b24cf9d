//! Background thread enrichment: summary, mood and character inference.
//!
//! Runs after a completed turn, at most `max_runs_per_thread_per_hour`
//! times per thread. Failures are logged and never reach the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use cg_domain::config::EnrichmentConfig;
use cg_domain::conversation::Thread;
use cg_domain::error::{Error, Result};
use cg_domain::memory::{MemoryCategory, MemoryScope};
use cg_domain::tenant::TenantConfig;
use cg_domain::tool::{Message, Role};
use cg_domain::trace::TraceEvent;
use cg_memory::{MemoryIngestRequest, MemoryStore};
use cg_providers::{with_retry, ChatRequest, ProviderFactory, ProviderResolver};

use crate::collab::rate_limit::HourlyWindows;
use crate::collab::store::{ThreadStore, ThreadUpdate};

const TRANSCRIPT_MESSAGES: usize = 40;
const TRANSCRIPT_CHARS_PER_MESSAGE: usize = 600;

const INSTRUCTIONS: &str = "You maintain notes about a conversation. Read the transcript and reply \
with a single JSON object and nothing else: \
{\"summary\": \"<two or three sentences>\", \"mood\": \"<one word for the user's mood>\", \
\"character\": \"<one sentence about the user's personality, or empty>\"}";

#[derive(Debug, Clone)]
pub struct EnrichmentJob {
    pub thread: Thread,
    pub tenant: TenantConfig,
    /// Owner of any inferred character memory.
    pub principal: String,
}

#[derive(Debug, Default, Deserialize)]
struct EnrichmentReply {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    mood: Option<String>,
    #[serde(default)]
    character: Option<String>,
}

pub struct Enricher {
    config: EnrichmentConfig,
    attempts: u32,
    threads: Arc<dyn ThreadStore>,
    memory: Arc<dyn MemoryStore>,
    resolver: Arc<ProviderResolver>,
    factory: Arc<dyn ProviderFactory>,
    runs: Mutex<HourlyWindows>,
}

impl Enricher {
    pub fn new(
        config: EnrichmentConfig,
        attempts: u32,
        threads: Arc<dyn ThreadStore>,
        memory: Arc<dyn MemoryStore>,
        resolver: Arc<ProviderResolver>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            config,
            attempts,
            threads,
            memory,
            resolver,
            factory,
            runs: Mutex::new(HourlyWindows::new()),
        }
    }

    /// Spawn an enrichment run if the thread is eligible and under its
    /// hourly allowance.
    pub fn maybe_spawn(self: &Arc<Self>, job: EnrichmentJob) -> Option<tokio::task::JoinHandle<()>> {
        if !eligible(&self.config, &job.thread) {
            return None;
        }
        if !self.admit(&job.thread.id, Utc::now()) {
            tracing::debug!(thread_id = %job.thread.id, "enrichment skipped: hourly allowance used");
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let thread_id = job.thread.id.clone();
            let ok = match this.run(job).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(thread_id = %thread_id, error = %e, "enrichment failed");
                    false
                }
            };
            TraceEvent::EnrichmentRun {
                thread_id,
                kind: "summary".into(),
                ok,
            }
            .emit();
        }))
    }

    fn admit(&self, thread_id: &str, now: DateTime<Utc>) -> bool {
        self.runs
            .lock()
            .hit(thread_id, now, Some(self.config.max_runs_per_thread_per_hour))
            .is_ok()
    }

    async fn run(&self, job: EnrichmentJob) -> Result<()> {
        let agent = self.config.agent.as_deref().unwrap_or(&job.thread.agent);
        let handle = self.resolver.resolve(agent, &job.tenant, None)?;
        let provider = self.factory.build(&handle)?;

        let history = self
            .threads
            .list_messages(&job.thread.id, TRANSCRIPT_MESSAGES)
            .await?;
        let req = ChatRequest {
            messages: vec![
                Message::system(INSTRUCTIONS),
                Message::user(transcript(&history)),
            ],
            tools: Vec::new(),
            temperature: Some(0.2),
            max_tokens: Some(400),
            model: None,
        };
        let resp = with_retry(self.attempts, provider.provider_id(), || provider.chat(&req)).await?;
        let reply = parse_reply(&resp.content)?;

        let summary = non_empty(reply.summary);
        let mood = non_empty(reply.mood);
        if summary.is_some() || mood.is_some() {
            self.threads
                .update_thread(ThreadUpdate {
                    thread_id: job.thread.id.clone(),
                    summary,
                    mood,
                })
                .await?;
        }
        if let Some(character) = non_empty(reply.character) {
            self.memory
                .ingest(MemoryIngestRequest {
                    owner: job.principal,
                    scope: MemoryScope::User,
                    content: character,
                    category: MemoryCategory::Character,
                    importance: 4,
                    source_thread_id: Some(job.thread.id),
                })
                .await?;
        }
        Ok(())
    }
}

fn eligible(config: &EnrichmentConfig, thread: &Thread) -> bool {
    config.enabled && thread.message_count >= config.min_messages
}

fn transcript(history: &[cg_domain::conversation::ConversationMessage]) -> String {
    let mut out = String::new();
    for m in history {
        let who = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System | Role::Tool => continue,
        };
        let text: String = m.content.chars().take(TRANSCRIPT_CHARS_PER_MESSAGE).collect();
        out.push_str(who);
        out.push_str(": ");
        out.push_str(text.trim());
        out.push('\n');
    }
    out
}

/// Models often wrap JSON in prose or code fences; take the outermost
/// object.
fn parse_reply(content: &str) -> Result<EnrichmentReply> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(serde_json::from_str(&content[s..=e])?),
        _ => Err(Error::Other("enrichment reply has no JSON object".into())),
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::config::Config;
    use cg_memory::InMemoryStore;
    use cg_providers::HttpProviderFactory;

    use crate::collab::InMemoryThreadStore;

    fn enricher(config: EnrichmentConfig) -> Enricher {
        Enricher::new(
            config,
            1,
            Arc::new(InMemoryThreadStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(ProviderResolver::from_config(&Config::default()).unwrap()),
            Arc::new(HttpProviderFactory::new(std::time::Duration::from_secs(1)).unwrap()),
        )
    }

    fn thread(message_count: usize) -> Thread {
        Thread {
            id: "th".into(),
            tenant_id: "t".into(),
            owner: "m1".into(),
            agent: "claude".into(),
            app_id: None,
            summary: None,
            mood: None,
            message_count,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn one_run_per_thread_per_hour() {
        let e = enricher(EnrichmentConfig::default());
        let t0 = Utc::now();
        assert!(e.admit("th", t0));
        assert!(!e.admit("th", t0 + chrono::Duration::minutes(30)));
        assert!(e.admit("other", t0 + chrono::Duration::minutes(30)));
        assert!(e.admit("th", t0 + chrono::Duration::minutes(61)));
    }

    #[test]
    fn allowance_follows_config() {
        let e = enricher(EnrichmentConfig {
            max_runs_per_thread_per_hour: 2,
            ..EnrichmentConfig::default()
        });
        let t0 = Utc::now();
        assert!(e.admit("th", t0));
        assert!(e.admit("th", t0));
        assert!(!e.admit("th", t0));
    }

    #[test]
    fn short_or_disabled_threads_are_not_eligible() {
        let cfg = EnrichmentConfig {
            min_messages: 6,
            ..EnrichmentConfig::default()
        };
        assert!(!eligible(&cfg, &thread(5)));
        assert!(eligible(&cfg, &thread(6)));

        let off = EnrichmentConfig {
            enabled: false,
            ..cfg
        };
        assert!(!eligible(&off, &thread(50)));
    }

    #[test]
    fn idle_threads_are_forgotten() {
        let e = enricher(EnrichmentConfig::default());
        let t0 = Utc::now();
        e.admit("a", t0);
        e.admit("b", t0);
        assert_eq!(e.runs.lock().tracked(), 2);
        e.admit("c", t0 + chrono::Duration::hours(2));
        assert_eq!(e.runs.lock().tracked(), 1);
    }

    #[test]
    fn parses_fenced_json() {
        let r = parse_reply("Sure:\n```json\n{\"summary\": \"tea talk\", \"mood\": \"calm\"}\n```")
            .unwrap();
        assert_eq!(r.summary.as_deref(), Some("tea talk"));
        assert_eq!(r.mood.as_deref(), Some("calm"));
        assert!(r.character.is_none());
        assert!(parse_reply("no json here").is_err());
    }

    #[test]
    fn blank_fields_are_dropped() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" calm ".into())).as_deref(), Some("calm"));
    }

    #[test]
    fn transcript_skips_bookkeeping_rows() {
        use cg_domain::conversation::ConversationMessage;
        let msgs = vec![
            ConversationMessage::new("t", Role::System, "internal"),
            ConversationMessage::new("t", Role::User, "hello"),
            ConversationMessage::new("t", Role::Assistant, "hi there"),
        ];
        assert_eq!(transcript(&msgs), "user: hello\nassistant: hi there\n");
    }
}
