use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A persisted fact or preference inferred from past conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub category: MemoryCategory,
    /// 0-10, higher is more important.
    pub importance: u8,
    pub scope: MemoryScope,
    #[serde(default)]
    pub source_thread_id: Option<String>,
    /// Reinforcement counter, bumped each time the item is injected.
    #[serde(default)]
    pub usage_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Preference,
    Fact,
    Context,
    Instruction,
    Relationship,
    Goal,
    Character,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 7] = [
        MemoryCategory::Instruction,
        MemoryCategory::Preference,
        MemoryCategory::Fact,
        MemoryCategory::Relationship,
        MemoryCategory::Goal,
        MemoryCategory::Context,
        MemoryCategory::Character,
    ];

    pub fn emoji(&self) -> &'static str {
        match self {
            MemoryCategory::Preference => "❤️",
            MemoryCategory::Fact => "📌",
            MemoryCategory::Context => "🧭",
            MemoryCategory::Instruction => "📋",
            MemoryCategory::Relationship => "👥",
            MemoryCategory::Goal => "🎯",
            MemoryCategory::Character => "🎭",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Preference => "preference",
            MemoryCategory::Fact => "fact",
            MemoryCategory::Context => "context",
            MemoryCategory::Instruction => "instruction",
            MemoryCategory::Relationship => "relationship",
            MemoryCategory::Goal => "goal",
            MemoryCategory::Character => "character",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Personal memory of a member or guest.
    User,
    /// Institutional knowledge of an application.
    App,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge side-context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A retrieval hit from the document index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnippet {
    pub document_id: String,
    pub title: String,
    pub text: String,
    /// Retrieval score; higher ranks first.
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
}

/// A curated app-knowledge entry (FAQ, policy, product note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub title: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_roundtrips_names() {
        for c in MemoryCategory::ALL {
            assert_eq!(MemoryCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(MemoryCategory::parse("nonsense"), None);
    }

    #[test]
    fn every_category_has_distinct_emoji() {
        let mut seen = std::collections::HashSet::new();
        for c in MemoryCategory::ALL {
            assert!(seen.insert(c.emoji()));
        }
    }
}
