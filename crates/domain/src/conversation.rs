use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::tool::Role;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Threads and messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A conversation thread as the persistence layer stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub tenant_id: String,
    /// Owner of the thread: a member id or a guest id.
    pub owner: String,
    /// Logical agent the thread talks to (e.g. "claude").
    pub agent: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// One persisted message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(thread_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A file attached to a user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    /// Base64 payload for binary content (images, audio, pdf).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Remote location, when the client uploaded elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extracted text for documents; the budget enforcer may strip it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Attachment {
    pub fn capability(&self) -> Capability {
        Capability::from_mime(&self.mime)
    }
}
