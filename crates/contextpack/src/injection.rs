//! Prompt-text rendering for injected knowledge.
//!
//! Each block is delimited so the model (and a human reading logs) can
//! tell injected context apart from instructions.

use std::collections::BTreeMap;

use cg_domain::memory::{CalendarEvent, DocumentSnippet, KnowledgeEntry, MemoryCategory, MemoryItem};

/// One line per memory, grouped by category with the category's emoji.
///
/// Categories appear in [`MemoryCategory::ALL`] order; within a category
/// the input order is kept.
pub fn render_memories(items: &[MemoryItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut groups: BTreeMap<usize, Vec<&MemoryItem>> = BTreeMap::new();
    for item in items {
        let rank = MemoryCategory::ALL
            .iter()
            .position(|c| *c == item.category)
            .unwrap_or(MemoryCategory::ALL.len());
        groups.entry(rank).or_default().push(item);
    }

    let mut out = String::from("=== MEMORY ===\n");
    for group in groups.values() {
        for item in group {
            out.push_str(item.category.emoji());
            out.push(' ');
            out.push_str(item.content.trim());
            out.push('\n');
        }
    }
    out.push_str("=== END_MEMORY ===\n");
    out
}

pub fn render_documents(docs: &[DocumentSnippet]) -> String {
    if docs.is_empty() {
        return String::new();
    }
    let mut out = String::from("=== DOCUMENTS ===\n");
    for doc in docs {
        out.push_str(&format!(
            "--- {} ({}) ---\n{}\n",
            doc.title,
            doc.document_id,
            doc.text.trim()
        ));
    }
    out.push_str("=== END_DOCUMENTS ===\n");
    out
}

pub fn render_calendar(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return String::new();
    }
    let mut out = String::from("=== CALENDAR ===\n");
    for ev in events {
        let when = ev.starts_at.format("%Y-%m-%d %H:%M UTC");
        match ev.location {
            Some(ref loc) => out.push_str(&format!("- {when}: {} @ {loc}\n", ev.title)),
            None => out.push_str(&format!("- {when}: {}\n", ev.title)),
        }
    }
    out.push_str("=== END_CALENDAR ===\n");
    out
}

pub fn render_knowledge(entries: &[KnowledgeEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut out = String::from("=== APP_KNOWLEDGE ===\n");
    for e in entries {
        out.push_str(&format!("## {}\n{}\n", e.title, e.body.trim()));
    }
    out.push_str("=== END_APP_KNOWLEDGE ===\n");
    out
}

/// Placeholder left in a user turn when an attachment's extracted text
/// is stripped to fit the budget.
pub fn omitted_attachment_marker(name: &str) -> String {
    format!("[attachment \"{name}\" omitted: too large for this model]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::memory::MemoryScope;
    use chrono::{TimeZone, Utc};

    fn mem(content: &str, category: MemoryCategory) -> MemoryItem {
        MemoryItem {
            id: content.into(),
            content: content.into(),
            category,
            importance: 5,
            scope: MemoryScope::User,
            source_thread_id: None,
            usage_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn memories_grouped_by_category() {
        let out = render_memories(&[
            mem("likes tea", MemoryCategory::Preference),
            mem("always answer briefly", MemoryCategory::Instruction),
            mem("prefers mornings", MemoryCategory::Preference),
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "=== MEMORY ===");
        assert_eq!(lines[1], "📋 always answer briefly");
        assert_eq!(lines[2], "❤️ likes tea");
        assert_eq!(lines[3], "❤️ prefers mornings");
        assert_eq!(lines[4], "=== END_MEMORY ===");
    }

    #[test]
    fn empty_inputs_render_nothing() {
        assert!(render_memories(&[]).is_empty());
        assert!(render_documents(&[]).is_empty());
        assert!(render_calendar(&[]).is_empty());
        assert!(render_knowledge(&[]).is_empty());
    }

    #[test]
    fn calendar_includes_location() {
        let out = render_calendar(&[CalendarEvent {
            title: "Dentist".into(),
            starts_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
            ends_at: None,
            location: Some("Main St".into()),
        }]);
        assert!(out.contains("- 2026-03-01 09:30 UTC: Dentist @ Main St"));
    }
}
