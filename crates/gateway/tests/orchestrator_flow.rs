//! End-to-end turns through the orchestrator with a scripted model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream;
use futures_util::StreamExt;
use parking_lot::Mutex;

use cg_domain::config::Config;
use cg_domain::conversation::{Attachment, Thread};
use cg_domain::error::{Error, Result};
use cg_domain::memory::{MemoryCategory, MemoryItem, MemoryScope};
use cg_domain::stream::{BoxStream, StreamEvent, Usage};
use cg_domain::tenant::Identity;
use cg_domain::tool::Role;
use cg_gateway::collab::{
    BroadcastNotifier, InMemoryThreadStore, TenantDirectory, ThreadStore, TierRateLimiter,
};
use cg_gateway::runtime::{
    Orchestrator, OrchestratorDeps, SessionState, ToolRegistry, TurnEvent, TurnHandle,
    TurnRequest,
};
use cg_memory::{InMemoryStore, MemoryStore};
use cg_providers::{
    ChatRequest, ChatResponse, LlmProvider, ProviderFactory, ProviderHandle, ProviderResolver,
};

// ── scripted model ──────────────────────────────────────────────────

enum Script {
    /// Emit these events, then end the stream.
    Finish(Vec<StreamEvent>),
    /// Emit these events, then never yield again.
    Hang(Vec<StreamEvent>),
    /// Emit one token every interval, forever.
    Trickle(Duration),
}

#[derive(Default)]
struct ScriptedProvider {
    streams: Mutex<VecDeque<Script>>,
    replies: Mutex<VecDeque<String>>,
    stream_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    chat_fails: AtomicBool,
}

impl ScriptedProvider {
    fn stream(self: &Arc<Self>, script: Script) -> Arc<Self> {
        self.streams.lock().push_back(script);
        Arc::clone(self)
    }

    fn reply(self: &Arc<Self>, text: &str) -> Arc<Self> {
        self.replies.lock().push_back(text.to_owned());
        Arc::clone(self)
    }

    fn failing_chat(self: &Arc<Self>) -> Arc<Self> {
        self.chat_fails.store(true, Ordering::SeqCst);
        Arc::clone(self)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if self.chat_fails.load(Ordering::SeqCst) {
            return Err(Error::Provider {
                provider: "scripted".into(),
                message: "upstream unavailable".into(),
            });
        }
        let content = self.replies.lock().pop_front().unwrap_or_default();
        Ok(ChatResponse {
            content,
            ..ChatResponse::default()
        })
    }

    async fn chat_stream(
        &self,
        _req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::Finish(vec![token("ok"), done(None)]));
        let out: BoxStream<'static, Result<StreamEvent>> = match script {
            Script::Finish(events) => Box::pin(stream::iter(events.into_iter().map(Ok))),
            Script::Hang(events) => Box::pin(
                stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
            ),
            Script::Trickle(every) => Box::pin(stream::unfold((), move |()| async move {
                tokio::time::sleep(every).await;
                Some((Ok(token("tick ")), ()))
            })),
        };
        Ok(out)
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

struct ScriptedFactory(Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedFactory {
    fn build(&self, _handle: &ProviderHandle) -> Result<Arc<dyn LlmProvider>> {
        Ok(self.0.clone())
    }
}

fn token(text: &str) -> StreamEvent {
    StreamEvent::Token { text: text.into() }
}

fn done(usage: Option<Usage>) -> StreamEvent {
    StreamEvent::Done {
        usage,
        finish_reason: Some("stop".into()),
    }
}

// ── harness ─────────────────────────────────────────────────────────

const CONFIG: &str = r#"
default_agent = "claude"

[agents.claude]
provider = "anthropic"
model = "claude-test"

[streaming]
min_chunk_interval_ms = 0
provider_attempts = 1

[enrichment]
enabled = false

[limits.free]
hourly_requests = 100

[[tenants]]
tenant_id = "acme"
"#;

struct Harness {
    orch: Arc<Orchestrator>,
    threads: Arc<InMemoryThreadStore>,
    memory: Arc<InMemoryStore>,
    provider: Arc<ScriptedProvider>,
}

impl Harness {
    fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self::with_config(CONFIG, provider)
    }

    fn with_config(toml_str: &str, provider: Arc<ScriptedProvider>) -> Self {
        let config: Config = toml::from_str(toml_str).unwrap();
        let threads = Arc::new(InMemoryThreadStore::new());
        let memory = Arc::new(InMemoryStore::new());
        let deps = OrchestratorDeps {
            threads: threads.clone(),
            tenants: TenantDirectory::new(&config.tenants),
            limiter: Arc::new(TierRateLimiter::new(config.limits.clone())),
            notifier: Arc::new(BroadcastNotifier::new(256)),
            memory: memory.clone(),
            resolver: Arc::new(ProviderResolver::from_config(&config).unwrap()),
            factory: Arc::new(ScriptedFactory(provider.clone())),
            tools: ToolRegistry::with_builtins(memory.clone()),
        };
        let orch = Arc::new(Orchestrator::new(Arc::new(config), deps));
        let h = Self {
            orch,
            threads,
            memory,
            provider,
        };
        h.thread("th-1", "m1");
        h
    }

    fn thread(&self, id: &str, owner: &str) {
        self.threads.insert_thread(Thread {
            id: id.into(),
            tenant_id: "acme".into(),
            owner: owner.into(),
            agent: "claude".into(),
            app_id: None,
            summary: None,
            mood: None,
            message_count: 0,
            updated_at: Utc::now(),
        });
    }

    async fn start(&self, who: &Identity, thread_id: &str, content: &str) -> Result<TurnHandle> {
        self.orch
            .start_turn(
                who,
                TurnRequest {
                    thread_id: thread_id.into(),
                    content: content.into(),
                    ..TurnRequest::default()
                },
            )
            .await
    }

    fn assistant_messages(&self, thread_id: &str) -> usize {
        self.threads
            .messages(thread_id)
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }
}

fn member() -> Identity {
    Identity::member("m1")
}

async fn next_event(handle: &mut TurnHandle) -> Option<TurnEvent> {
    tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
        .await
        .expect("turn event timed out")
}

async fn drain(handle: &mut TurnHandle) -> Vec<TurnEvent> {
    let mut out = Vec::new();
    while let Some(ev) = next_event(handle).await {
        out.push(ev);
    }
    out
}

// ── completion ──────────────────────────────────────────────────────

#[tokio::test]
async fn completed_turn_persists_exactly_one_assistant_message() {
    let provider = Arc::new(ScriptedProvider::default()).stream(Script::Finish(vec![
        token("Hello"),
        token(" there"),
        done(Some(Usage {
            prompt_tokens: 12,
            completion_tokens: 3,
            total_tokens: 15,
        })),
    ]));
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "hi").await.unwrap();
    let events = drain(&mut handle).await;

    assert!(matches!(events.first(), Some(TurnEvent::SessionStarted { .. })));
    let deltas: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Delta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, "Hello there");
    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::Final { content, reconciled: false, .. } if content == "Hello there"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::Usage { total_tokens: 15, .. })));

    assert_eq!(h.assistant_messages("th-1"), 1);
    assert_eq!(h.threads.messages("th-1").len(), 2);
    assert!(h.orch.sessions().is_empty());
}

#[tokio::test]
async fn empty_text_tool_call_triggers_a_single_follow_up() {
    let provider = Arc::new(ScriptedProvider::default())
        .stream(Script::Finish(vec![
            StreamEvent::ToolCallFinished {
                call_id: "call-1".into(),
                tool_name: "save_memory".into(),
                arguments: serde_json::json!({
                    "content": "prefers aisle seats",
                    "category": "preference"
                }),
            },
            done(None),
        ]))
        .stream(Script::Finish(vec![done(None)]))
        .reply("Noted, I'll remember you prefer aisle seats.");
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "remember I like aisle seats").await.unwrap();
    let events = drain(&mut handle).await;

    assert_eq!(h.provider.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.stream_calls.load(Ordering::SeqCst), 2);

    let tool_pos = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolResult { is_error: false, .. }))
        .expect("tool result event");
    let final_pos = events
        .iter()
        .position(|e| matches!(e, TurnEvent::Final { reconciled: true, .. }))
        .expect("reconciled final event");
    assert!(tool_pos < final_pos);

    let persisted: Vec<_> = h
        .threads
        .messages("th-1")
        .into_iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(persisted.len(), 1);
    assert!(persisted[0].content.contains("aisle seats"));

    let saved = h.memory.personal_memories("m1", "elsewhere", 10).await.unwrap();
    assert!(saved.iter().any(|m| m.content == "prefers aisle seats"));
}

#[tokio::test]
async fn follow_up_with_no_text_falls_back_to_confirmation() {
    let provider = Arc::new(ScriptedProvider::default())
        .stream(Script::Finish(vec![
            StreamEvent::ToolCallFinished {
                call_id: "call-1".into(),
                tool_name: "save_memory".into(),
                arguments: serde_json::json!({ "content": "has a cat" }),
            },
            done(None),
        ]))
        .stream(Script::Finish(vec![done(None)]))
        .reply("   ");
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "I have a cat").await.unwrap();
    drain(&mut handle).await;

    let reply = h
        .threads
        .messages("th-1")
        .into_iter()
        .find(|m| m.role == Role::Assistant)
        .expect("assistant message");
    assert!(reply.content.contains("save_memory"));
}

#[tokio::test]
async fn memory_reinforcement_is_applied_once_per_session() {
    let h = Harness::new(Arc::new(ScriptedProvider::default()));
    h.memory.insert_memory(
        "m1",
        MemoryItem {
            id: "mem-1".into(),
            content: "prefers window seats".into(),
            category: MemoryCategory::Preference,
            importance: 8,
            scope: MemoryScope::User,
            source_thread_id: None,
            usage_count: 0,
            created_at: Utc::now(),
        },
    );

    let mut handle = h.start(&member(), "th-1", "book me a flight").await.unwrap();
    let session_id = handle.session_id.clone();
    drain(&mut handle).await;

    // Post-completion runs in the background.
    for _ in 0..100 {
        if h.memory.usage_count("mem-1") == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.memory.usage_count("mem-1"), Some(1));

    let replayed = h.memory.reinforce(&session_id, &["mem-1".to_string()]).await.unwrap();
    assert_eq!(replayed, 0);
    assert_eq!(h.memory.usage_count("mem-1"), Some(1));
}

#[tokio::test]
async fn enrichment_failure_does_not_affect_the_turn() {
    let config = CONFIG.replace(
        "[enrichment]\nenabled = false",
        "[enrichment]\nenabled = true\nmin_messages = 0",
    );
    let provider = Arc::new(ScriptedProvider::default())
        .stream(Script::Finish(vec![token("All done."), done(None)]))
        .failing_chat();
    let h = Harness::with_config(&config, provider);

    let mut handle = h.start(&member(), "th-1", "wrap it up").await.unwrap();
    let events = drain(&mut handle).await;

    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::Final { content, .. } if content == "All done."
    )));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::Error { .. })));

    // Enrichment runs detached; wait until it has called the model.
    for _ in 0..100 {
        if h.provider.chat_calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.provider.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.assistant_messages("th-1"), 1);
    let thread = h.threads.get_thread("th-1").await.unwrap().unwrap();
    assert!(thread.summary.is_none());
}

// ── provider failure ────────────────────────────────────────────────

#[tokio::test]
async fn provider_error_mid_stream_persists_nothing() {
    let provider = Arc::new(ScriptedProvider::default()).stream(Script::Finish(vec![
        token("partial "),
        StreamEvent::Error {
            message: "connection reset".into(),
        },
    ]));
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "explain tides").await.unwrap();
    let events = drain(&mut handle).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::Delta { text } if text == "partial ")));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Error { code, status: 500, .. }) if code == "provider_error"
    ));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::Final { .. })));
    assert_eq!(h.assistant_messages("th-1"), 0);
    assert!(h.orch.sessions().is_empty());
}

// ── cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn stop_mid_stream_persists_nothing() {
    let provider = Arc::new(ScriptedProvider::default())
        .stream(Script::Hang(vec![token("partial answer")]));
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "tell me a story").await.unwrap();
    loop {
        match next_event(&mut handle).await {
            Some(TurnEvent::Delta { .. }) => break,
            Some(_) => continue,
            None => panic!("stream ended before any delta"),
        }
    }

    h.orch.stop(&member(), &handle.session_id).unwrap();
    let rest = drain(&mut handle).await;

    assert!(rest.iter().any(|e| matches!(e, TurnEvent::Stopped)));
    assert!(!rest.iter().any(|e| matches!(e, TurnEvent::Final { .. })));
    assert_eq!(h.assistant_messages("th-1"), 0);
    assert!(h.orch.sessions().is_empty());

    let again = h.orch.stop(&member(), &handle.session_id).unwrap_err();
    assert!(matches!(again, Error::SessionNotFound(_)));
}

#[tokio::test]
async fn stop_unknown_session_has_no_side_effects() {
    let h = Harness::new(Arc::new(ScriptedProvider::default()));

    let err = h.orch.stop(&member(), "no-such-session").unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
    assert_eq!(err.status(), 404);
    assert!(h.orch.sessions().is_empty());
    assert_eq!(h.provider.stream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn only_the_recipient_can_stop_a_session() {
    let provider = Arc::new(ScriptedProvider::default()).stream(Script::Hang(vec![]));
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "hello").await.unwrap();
    let err = h
        .orch
        .stop(&Identity::member("intruder"), &handle.session_id)
        .unwrap_err();
    assert_eq!(err.status(), 403);
    assert_eq!(h.orch.live_sessions(&member()).unwrap().len(), 1);
    assert!(h.orch.live_sessions(&Identity::member("intruder")).unwrap().is_empty());

    h.orch.stop(&member(), &handle.session_id).unwrap();
    let rest = drain(&mut handle).await;
    assert!(rest.iter().any(|e| matches!(e, TurnEvent::Stopped)));
}

#[tokio::test]
async fn sweeper_spares_a_session_that_keeps_streaming() {
    let provider = Arc::new(ScriptedProvider::default())
        .stream(Script::Trickle(Duration::from_millis(20)));
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "count forever").await.unwrap();
    let mut deltas = 0;
    while deltas < 10 {
        match next_event(&mut handle).await {
            Some(TurnEvent::Delta { .. }) => deltas += 1,
            Some(_) => continue,
            None => panic!("stream ended while still trickling"),
        }
    }

    // Older than the idle limit, but active within it.
    assert_eq!(h.orch.sessions().sweep(Duration::from_millis(150)), 0);
    assert_eq!(
        h.orch.sessions().state(&handle.session_id),
        Some(SessionState::Streaming)
    );

    h.orch.stop(&member(), &handle.session_id).unwrap();
    let rest = drain(&mut handle).await;
    assert!(rest.iter().any(|e| matches!(e, TurnEvent::Stopped)));
    assert_eq!(h.assistant_messages("th-1"), 0);
}

#[tokio::test]
async fn sweeper_cancels_a_silent_session() {
    let provider = Arc::new(ScriptedProvider::default())
        .stream(Script::Hang(vec![token("then silence")]));
    let h = Harness::new(provider);

    let mut handle = h.start(&member(), "th-1", "hello?").await.unwrap();
    loop {
        match next_event(&mut handle).await {
            Some(TurnEvent::Delta { .. }) => break,
            Some(_) => continue,
            None => panic!("stream ended before any delta"),
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.orch.sessions().sweep(Duration::from_millis(50)), 1);
    let rest = drain(&mut handle).await;
    assert!(rest.iter().any(|e| matches!(e, TurnEvent::Stopped)));
    assert_eq!(h.assistant_messages("th-1"), 0);
    assert!(h.orch.sessions().is_empty());
}

// ── preflight ───────────────────────────────────────────────────────

#[tokio::test]
async fn preflight_rejections_map_to_http_statuses() {
    let h = Harness::new(Arc::new(ScriptedProvider::default()));
    h.thread("th-other", "m2");

    let anon = h.start(&Identity::default(), "th-1", "hi").await.err().unwrap();
    assert_eq!(anon.status(), 401);

    let missing = h.start(&member(), "nope", "hi").await.err().unwrap();
    assert_eq!(missing.status(), 404);

    let foreign = h.start(&member(), "th-other", "hi").await.err().unwrap();
    assert_eq!(foreign.status(), 403);

    let empty = h.start(&member(), "th-1", "   ").await.err().unwrap();
    assert_eq!(empty.status(), 400);

    let image = h
        .orch
        .start_turn(
            &member(),
            TurnRequest {
                thread_id: "th-1".into(),
                content: "what is this?".into(),
                attachments: vec![Attachment {
                    name: "cat.png".into(),
                    mime: "image/png".into(),
                    data: Some("aGk=".into()),
                    url: None,
                    text: None,
                }],
                ..TurnRequest::default()
            },
        )
        .await
        .err()
        .unwrap();
    assert_eq!(image.status(), 400);

    assert!(h.threads.messages("th-1").is_empty());
    assert_eq!(h.provider.stream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn hourly_request_limit_returns_quota_error() {
    let config = CONFIG.replace("hourly_requests = 100", "hourly_requests = 1");
    let h = Harness::with_config(&config, Arc::new(ScriptedProvider::default()));

    let mut first = h.start(&member(), "th-1", "one").await.unwrap();
    drain(&mut first).await;

    let err = h.start(&member(), "th-1", "two").await.err().unwrap();
    assert_eq!(err.status(), 429);
    assert_eq!(err.code(), "quota_exceeded");
    assert_eq!(h.threads.messages("th-1").len(), 2);
}
