//! The spawned turn loop: build the prompt, stream the model, run tools,
//! reconcile, persist.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cg_contextpack::budget::{self, PromptSections};
use cg_contextpack::builder::PromptAssembler;
use cg_contextpack::{tokens, window};
use cg_domain::conversation::{ConversationMessage, Thread};
use cg_domain::error::{Error, Result};
use cg_domain::stream::{BoxStream, StreamEvent, Usage};
use cg_domain::tool::{Message, Role, ToolCall, ToolDefinition};
use cg_domain::trace::TraceEvent;
use cg_memory::{ComposeRequest, MemoryScopeKey};
use cg_providers::{with_retry, ChatRequest, LlmProvider};

use crate::collab::notify::NotifyEvent;

use super::events::TurnEvent;
use super::forward::{Chunk, ChunkForwarder, ForwardRoute};
use super::post::CompletedTurn;
use super::reconcile::{reconcile, ReconcileInput};
use super::tools::ToolContext;
use super::{Orchestrator, TurnContext};

enum Driven {
    Completed(Completion),
    Cancelled,
}

struct Completion {
    text: String,
    reconciled: bool,
    usage: Usage,
    used_memory_ids: Vec<String>,
}

#[derive(Default)]
struct Round {
    text: String,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

struct Streamed {
    text: String,
    tools_invoked: Vec<String>,
    messages: Vec<Message>,
    usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn run(
    orch: Arc<Orchestrator>,
    ctx: TurnContext,
    cancel: CancellationToken,
    events: mpsc::Sender<TurnEvent>,
) {
    tracing::debug!("turn started");
    match drive(&orch, &ctx, &cancel, &events).await {
        Ok(Driven::Completed(done)) => finish(&orch, &ctx, done, &events).await,
        Ok(Driven::Cancelled) => stopped(&orch, &ctx, &events).await,
        Err(_) if cancel.is_cancelled() => stopped(&orch, &ctx, &events).await,
        Err(e) => {
            orch.sessions.fail(&ctx.session_id);
            tracing::warn!(error = %e, "turn failed; partial output discarded");
            orch.notifier.publish(
                &ctx.principal,
                NotifyEvent::Failed {
                    session_id: ctx.session_id.clone(),
                    thread_id: ctx.thread.id.clone(),
                    code: e.code().to_owned(),
                },
            );
            let _ = events.send(TurnEvent::error(&e)).await;
        }
    }
}

async fn stopped(orch: &Orchestrator, ctx: &TurnContext, events: &mpsc::Sender<TurnEvent>) {
    tracing::info!("turn stopped; nothing persisted");
    orch.notifier.publish(
        &ctx.principal,
        NotifyEvent::Cancelled {
            session_id: ctx.session_id.clone(),
            thread_id: ctx.thread.id.clone(),
        },
    );
    let _ = events.send(TurnEvent::Stopped).await;
}

/// Claim completion, persist exactly one assistant message, then hand
/// off to post-completion.
async fn finish(
    orch: &Orchestrator,
    ctx: &TurnContext,
    done: Completion,
    events: &mpsc::Sender<TurnEvent>,
) {
    if !orch.sessions.complete(&ctx.session_id) {
        // Lost the race against a stop request or the sweeper.
        stopped(orch, ctx, events).await;
        return;
    }

    let reply = ConversationMessage::new(&ctx.thread.id, Role::Assistant, done.text);
    let saved = match orch.threads.create_message(reply).await {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to persist assistant message");
            let _ = events.send(TurnEvent::error(&e)).await;
            return;
        }
    };

    let _ = events
        .send(TurnEvent::Final {
            message_id: saved.id.clone(),
            content: saved.content.clone(),
            reconciled: done.reconciled,
        })
        .await;
    let _ = events
        .send(TurnEvent::Usage {
            prompt_tokens: done.usage.prompt_tokens,
            completion_tokens: done.usage.completion_tokens,
            total_tokens: done.usage.total_tokens,
        })
        .await;
    orch.notifier.publish(
        &ctx.principal,
        NotifyEvent::Completed {
            session_id: ctx.session_id.clone(),
            thread_id: ctx.thread.id.clone(),
            message_id: saved.id,
        },
    );

    let thread = match orch.threads.get_thread(&ctx.thread.id).await {
        Ok(Some(t)) => t,
        _ => ctx.thread.clone(),
    };
    orch.post.run(CompletedTurn {
        session_id: ctx.session_id.clone(),
        thread,
        tenant: ctx.tenant.clone(),
        principal: ctx.principal.clone(),
        used_memory_ids: done.used_memory_ids,
        usage: done.usage,
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt + streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive(
    orch: &Orchestrator,
    ctx: &TurnContext,
    cancel: &CancellationToken,
    events: &mpsc::Sender<TurnEvent>,
) -> Result<Driven> {
    let cfg = &orch.config;

    // ── History window ──────────────────────────────────────────
    let loaded = orch
        .threads
        .list_messages(&ctx.thread.id, cfg.context.max_history_messages + 1)
        .await?;
    let history = window::exclude_in_flight(loaded, &ctx.user_message.id);
    let history_total = history.len();
    let windowed = window::build(&history, cfg.context.history_budget_tokens).to_vec();

    // ── Memory & knowledge ──────────────────────────────────────
    let composed = orch
        .composer
        .compose(&ComposeRequest {
            scope: MemoryScopeKey {
                user_id: ctx.identity.member.clone(),
                guest_id: ctx.identity.guest.clone(),
                app_id: ctx.app_id.clone(),
            },
            thread_id: ctx.thread.id.clone(),
            page_size: cfg.memory.page_size_for(ctx.thread.message_count),
            query: ctx.user_message.content.clone(),
            document_limit: cfg.context.document_limit,
            calendar_days: cfg.memory.calendar_days,
        })
        .await;

    // ── Budget ──────────────────────────────────────────────────
    let tool_defs = orch.tools.definitions();
    let mut sections = PromptSections {
        system: system_prompt(&cfg.context.system_prompt, &ctx.thread),
        side_context: composed.side_context,
        memories: composed.memories,
        documents: composed.documents,
        history: windowed,
        current: ctx.user_message.clone(),
        tool_tokens: tool_tokens(&tool_defs),
    };
    let report = budget::enforce(
        &mut sections,
        ctx.handle.max_prompt_tokens,
        cfg.context.keep_recent_turns,
    );
    if report.pruned() || !report.within_ceiling {
        report.trace().emit();
    }
    TraceEvent::ContextBuilt {
        thread_id: ctx.thread.id.clone(),
        history_total,
        history_kept: sections.history.len(),
        memory_items: sections.memories.len(),
        document_snippets: sections.documents.len(),
        estimated_tokens: report.after,
    }
    .emit();

    let used_memory_ids = sections.memory_ids();
    let messages = PromptAssembler::assemble(&sections);

    // ── Stream ──────────────────────────────────────────────────
    let provider = orch.factory.build(&ctx.handle)?;
    if !orch.sessions.mark_streaming(&ctx.session_id) {
        return Ok(Driven::Cancelled);
    }
    let forwarder = ChunkForwarder::spawn(
        ForwardRoute {
            session_id: ctx.session_id.clone(),
            thread_id: ctx.thread.id.clone(),
            recipient: ctx.principal.clone(),
        },
        Arc::clone(&orch.notifier),
        events.clone(),
        cfg.streaming.chunk_channel_capacity,
        Duration::from_millis(cfg.streaming.min_chunk_interval_ms),
        cancel.clone(),
    );

    let outcome = stream_and_reconcile(
        orch,
        ctx,
        provider.as_ref(),
        messages,
        tool_defs,
        &forwarder,
        cancel,
        report.after,
        used_memory_ids,
    )
    .await;
    forwarder.finish().await;
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn stream_and_reconcile(
    orch: &Orchestrator,
    ctx: &TurnContext,
    provider: &dyn LlmProvider,
    messages: Vec<Message>,
    tool_defs: Vec<ToolDefinition>,
    forwarder: &ChunkForwarder,
    cancel: &CancellationToken,
    prompt_estimate: usize,
    used_memory_ids: Vec<String>,
) -> Result<Driven> {
    let attempts = orch.config.streaming.provider_attempts;
    let Some(streamed) =
        stream_rounds(orch, ctx, provider, messages, tool_defs, forwarder, cancel).await?
    else {
        return Ok(Driven::Cancelled);
    };

    let reconciliation = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Driven::Cancelled),
        r = reconcile(ReconcileInput {
            session_id: &ctx.session_id,
            text: &streamed.text,
            tools_invoked: &streamed.tools_invoked,
            messages: &streamed.messages,
            provider,
            attempts,
            max_tokens: Some(ctx.handle.max_output_tokens),
            temperature: ctx.handle.temperature,
        }) => r?,
    };
    // Reconciled text reaches the caller exactly like streamed text.
    if reconciliation.reconciled() {
        forwarder.send(Chunk::Text(reconciliation.text.clone())).await;
    }

    let mut usage = streamed.usage;
    if let Some(u) = reconciliation.usage {
        add_usage(&mut usage, u);
    }
    if usage.total_tokens == 0 {
        usage = estimated_usage(prompt_estimate, &reconciliation.text);
    }
    Ok(Driven::Completed(Completion {
        reconciled: reconciliation.reconciled(),
        text: reconciliation.text,
        usage,
        used_memory_ids,
    }))
}

/// Stream up to `max_tool_rounds + 1` model calls, executing tool calls
/// between them. `None` means the session was cancelled.
async fn stream_rounds(
    orch: &Orchestrator,
    ctx: &TurnContext,
    provider: &dyn LlmProvider,
    mut messages: Vec<Message>,
    tool_defs: Vec<ToolDefinition>,
    forwarder: &ChunkForwarder,
    cancel: &CancellationToken,
) -> Result<Option<Streamed>> {
    let streaming = &orch.config.streaming;
    let tool_ctx = ToolContext {
        principal: ctx.principal.clone(),
        app_id: ctx.app_id.clone(),
        thread_id: ctx.thread.id.clone(),
    };
    let mut text = String::new();
    let mut tools_invoked = Vec::new();
    let mut usage = Usage::default();

    for round_idx in 0..=streaming.max_tool_rounds {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        // The last round withholds tools so the model has to answer.
        let offer_tools = round_idx < streaming.max_tool_rounds;
        let req = ChatRequest {
            messages: messages.clone(),
            tools: if offer_tools { tool_defs.clone() } else { Vec::new() },
            temperature: ctx.handle.temperature,
            max_tokens: Some(ctx.handle.max_output_tokens),
            model: None,
        };

        let started = Instant::now();
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            s = with_retry(streaming.provider_attempts, provider.provider_id(), || {
                provider.chat_stream(&req)
            }) => s?,
        };
        let Some(round) = consume_round(
            stream,
            provider.provider_id(),
            forwarder,
            cancel,
            || orch.sessions.touch(&ctx.session_id),
        )
        .await?
        else {
            return Ok(None);
        };

        TraceEvent::LlmRequest {
            provider: ctx.handle.provider.clone(),
            model: ctx.handle.model_id.clone(),
            streaming: true,
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: round.usage.map(|u| u.prompt_tokens),
            completion_tokens: round.usage.map(|u| u.completion_tokens),
        }
        .emit();
        if let Some(u) = round.usage {
            add_usage(&mut usage, u);
        }
        text.push_str(&round.text);

        if round.calls.is_empty() {
            break;
        }

        messages.push(Message::assistant_tool_calls(Some(round.text), &round.calls));
        for call in &round.calls {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            forwarder
                .send(Chunk::Event(TurnEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                }))
                .await;
            let (content, is_error) = orch.tools.dispatch(&tool_ctx, call).await;
            forwarder
                .send(Chunk::Event(TurnEvent::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    content: content.clone(),
                    is_error,
                }))
                .await;
            orch.sessions.touch(&ctx.session_id);
            messages.push(Message::tool_result(call.call_id.clone(), content));
            tools_invoked.push(call.tool_name.clone());
        }
    }

    Ok(Some(Streamed {
        text,
        tools_invoked,
        messages,
        usage,
    }))
}

/// Read one provider stream to its end. Dropping the stream on return
/// closes the upstream connection.
async fn consume_round(
    mut stream: BoxStream<'static, Result<StreamEvent>>,
    provider_id: &str,
    forwarder: &ChunkForwarder,
    cancel: &CancellationToken,
    touch: impl Fn(),
) -> Result<Option<Round>> {
    let mut round = Round::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            next = stream.next() => next,
        };
        let Some(event) = next else { break };
        touch();
        match event? {
            StreamEvent::Token { text } => {
                if text.is_empty() {
                    continue;
                }
                round.text.push_str(&text);
                if !forwarder.send(Chunk::Text(text)).await && cancel.is_cancelled() {
                    return Ok(None);
                }
            }
            StreamEvent::Thinking { text } => {
                forwarder.send(Chunk::Thinking(text)).await;
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => round.calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            }),
            StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::Done { usage, .. } => {
                if usage.is_some() {
                    round.usage = usage;
                }
            }
            StreamEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: provider_id.to_owned(),
                    message,
                });
            }
        }
    }
    Ok(Some(round))
}

// ── helpers ─────────────────────────────────────────────────────────

fn system_prompt(base: &str, thread: &Thread) -> String {
    let mut out = base.trim().to_owned();
    if let Some(summary) = thread.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str("\n\nSummary of the conversation so far: ");
        out.push_str(summary.trim());
    }
    if let Some(mood) = thread.mood.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str("\nThe user's recent mood: ");
        out.push_str(mood.trim());
    }
    out
}

fn tool_tokens(defs: &[ToolDefinition]) -> usize {
    if defs.is_empty() {
        return 0;
    }
    tokens::estimate(&serde_json::to_string(defs).unwrap_or_default())
}

fn add_usage(total: &mut Usage, u: Usage) {
    total.prompt_tokens = total.prompt_tokens.saturating_add(u.prompt_tokens);
    total.completion_tokens = total.completion_tokens.saturating_add(u.completion_tokens);
    total.total_tokens = total.total_tokens.saturating_add(u.total_tokens);
}

/// Fallback when the provider reported no usage at all.
fn estimated_usage(prompt_estimate: usize, completion: &str) -> Usage {
    let prompt = u32::try_from(prompt_estimate).unwrap_or(u32::MAX);
    let completion = u32::try_from(tokens::estimate(completion)).unwrap_or(u32::MAX);
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt.saturating_add(completion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn thread() -> Thread {
        Thread {
            id: "th".into(),
            tenant_id: "t".into(),
            owner: "m1".into(),
            agent: "claude".into(),
            app_id: None,
            summary: Some("planning a trip".into()),
            mood: Some(" ".into()),
            message_count: 3,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn system_prompt_carries_summary_only_when_set() {
        let p = system_prompt("You are helpful.", &thread());
        assert!(p.starts_with("You are helpful."));
        assert!(p.contains("planning a trip"));
        assert!(!p.contains("mood"));
    }

    #[test]
    fn usage_accumulates_and_estimates() {
        let mut u = Usage::default();
        add_usage(&mut u, Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 });
        add_usage(&mut u, Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 });
        assert_eq!(u.total_tokens, 17);

        let est = estimated_usage(100, "abcdefgh");
        assert_eq!(est.prompt_tokens, 100);
        assert_eq!(est.total_tokens, 100 + tokens::estimate("abcdefgh") as u32);
    }
}
