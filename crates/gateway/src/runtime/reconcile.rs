//! Recovery for turns where the model called tools but never answered.
//!
//! A turn that ends with empty text after at least one tool call gets
//! exactly one extra non-streaming call, primed with a synthetic
//! assistant turn and a user nudge. If that also comes back empty, a
//! fixed confirmation naming the tools is used, so the persisted message
//! is never empty.

use cg_domain::error::{Error, Result};
use cg_domain::stream::Usage;
use cg_domain::tool::Message;
use cg_domain::trace::TraceEvent;
use cg_providers::{with_retry, ChatRequest, LlmProvider};

pub const SYNTHETIC_ASSISTANT_TURN: &str = "I've completed the requested action.";
pub const FOLLOW_UP_NUDGE: &str =
    "Briefly tell me what you just did and anything I should know about the result.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model's own text was kept.
    Original,
    /// Text produced by the follow-up call.
    FollowUp,
    /// Fixed confirmation sentence.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub text: String,
    pub outcome: Outcome,
    /// Usage of the follow-up call, if one was made.
    pub usage: Option<Usage>,
}

impl Reconciliation {
    pub fn reconciled(&self) -> bool {
        self.outcome != Outcome::Original
    }
}

pub struct ReconcileInput<'a> {
    pub session_id: &'a str,
    pub text: &'a str,
    /// Names of every tool executed during the turn, in call order.
    pub tools_invoked: &'a [String],
    /// The prompt as sent in the last round, including tool results.
    pub messages: &'a [Message],
    pub provider: &'a dyn LlmProvider,
    pub attempts: u32,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

pub async fn reconcile(input: ReconcileInput<'_>) -> Result<Reconciliation> {
    if !input.text.trim().is_empty() {
        return Ok(Reconciliation {
            text: input.text.to_owned(),
            outcome: Outcome::Original,
            usage: None,
        });
    }
    if input.tools_invoked.is_empty() {
        return Err(Error::Provider {
            provider: input.provider.provider_id().to_owned(),
            message: "model returned an empty completion".into(),
        });
    }

    let mut messages = input.messages.to_vec();
    messages.push(Message::assistant(SYNTHETIC_ASSISTANT_TURN));
    messages.push(Message::user(FOLLOW_UP_NUDGE));
    let req = ChatRequest {
        messages,
        tools: Vec::new(),
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        model: None,
    };

    let provider_id = input.provider.provider_id().to_owned();
    let follow_up = with_retry(input.attempts, &provider_id, || input.provider.chat(&req)).await;

    let (text, outcome, usage) = match follow_up {
        Ok(resp) if !resp.content.trim().is_empty() => {
            (resp.content, Outcome::FollowUp, resp.usage)
        }
        Ok(resp) => (confirmation(input.tools_invoked), Outcome::Fallback, resp.usage),
        Err(e) => {
            tracing::warn!(
                session_id = input.session_id,
                error = %e,
                "tool follow-up call failed; using confirmation"
            );
            (confirmation(input.tools_invoked), Outcome::Fallback, None)
        }
    };

    TraceEvent::ToolReconciled {
        session_id: input.session_id.to_owned(),
        tools: dedup(input.tools_invoked),
        followup_chars: if outcome == Outcome::FollowUp { text.chars().count() } else { 0 },
    }
    .emit();

    Ok(Reconciliation { text, outcome, usage })
}

/// Confirmation used when no model text could be obtained.
pub fn confirmation(tools: &[String]) -> String {
    let names = dedup(tools);
    if names.is_empty() {
        return SYNTHETIC_ASSISTANT_TURN.to_owned();
    }
    format!("I've completed the requested action using {}.", names.join(", "))
}

fn dedup(tools: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tools.len());
    for t in tools {
        if !out.contains(t) {
            out.push(t.clone());
        }
    }
    out
}
