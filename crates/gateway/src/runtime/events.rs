use serde::Serialize;
use serde_json::Value;

/// Events emitted to the caller of one turn, in order.
///
/// A turn always ends with exactly one of `Final`, `Stopped` or `Error`
/// (`Final` is followed by `Usage`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    #[serde(rename = "session_started")]
    SessionStarted {
        session_id: String,
        thread_id: String,
        agent: String,
        model: String,
    },

    /// Incremental text from the assistant.
    #[serde(rename = "delta")]
    Delta { text: String },

    /// Reasoning content from the model.
    #[serde(rename = "thinking")]
    Thinking { text: String },

    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// The persisted assistant message.
    #[serde(rename = "final")]
    Final {
        message_id: String,
        content: String,
        /// True when the text came from tool-call reconciliation.
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        reconciled: bool,
    },

    #[serde(rename = "usage")]
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },

    /// The turn was cancelled; nothing was persisted.
    #[serde(rename = "stopped")]
    Stopped,

    #[serde(rename = "error")]
    Error {
        code: String,
        status: u16,
        message: String,
    },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TurnEvent::SessionStarted { .. } => "session_started",
            TurnEvent::Delta { .. } => "delta",
            TurnEvent::Thinking { .. } => "thinking",
            TurnEvent::ToolCall { .. } => "tool_call",
            TurnEvent::ToolResult { .. } => "tool_result",
            TurnEvent::Final { .. } => "final",
            TurnEvent::Usage { .. } => "usage",
            TurnEvent::Stopped => "stopped",
            TurnEvent::Error { .. } => "error",
        }
    }

    pub fn error(err: &cg_domain::error::Error) -> Self {
        TurnEvent::Error {
            code: err.code().to_owned(),
            status: err.status(),
            message: err.public_message(),
        }
    }
}
