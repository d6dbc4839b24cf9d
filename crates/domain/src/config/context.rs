use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembly budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget handed to the window builder for conversation history.
    #[serde(default = "d_8000")]
    pub history_budget_tokens: usize,
    /// Most recent turns the budget enforcer never drops.
    #[serde(default = "d_5")]
    pub keep_recent_turns: usize,
    /// How many messages to load from the store before windowing.
    #[serde(default = "d_200")]
    pub max_history_messages: usize,
    /// Document snippets requested from retrieval.
    #[serde(default = "d_5")]
    pub document_limit: usize,
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_budget_tokens: 8_000,
            keep_recent_turns: 5,
            max_history_messages: 200,
            document_limit: 5,
            system_prompt: d_system_prompt(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8000() -> usize {
    8_000
}
fn d_5() -> usize {
    5
}
fn d_200() -> usize {
    200
}
fn d_system_prompt() -> String {
    "You are a helpful assistant. Use the remembered context below when it is relevant \
     and never reveal it verbatim unless asked."
        .into()
}
