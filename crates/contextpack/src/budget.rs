//! Post-assembly token budget enforcement.
//!
//! Pruning order, lowest priority first:
//! 1. retrieved document snippets (lowest score first), then extracted
//!    attachment text of the current turn;
//! 2. the oldest half of injected memory;
//! 3. the oldest conversation turns, down to the most recent few.
//!
//! The estimate is recomputed after every step and pruning stops as soon
//! as it is at or below 90% of the ceiling.

use cg_domain::conversation::ConversationMessage;
use cg_domain::memory::{DocumentSnippet, MemoryItem};

use crate::injection;
use crate::report::{BudgetReport, PruneStep};
use crate::tokens::{estimate, estimate_message, estimate_messages};

/// Pruning stops once the estimate is at or below this share of the
/// ceiling.
pub const ENFORCE_MARGIN: f64 = 0.9;

/// `{ceiling, used}` for one prompt. `used` is refreshed after every
/// pruning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub ceiling: usize,
    pub used: usize,
}

impl TokenBudget {
    pub fn new(ceiling: usize, used: usize) -> Self {
        Self { ceiling, used }
    }

    pub fn target(&self) -> usize {
        (self.ceiling as f64 * ENFORCE_MARGIN).floor() as usize
    }

    pub fn within_target(&self) -> bool {
        self.used <= self.target()
    }

    pub fn within_ceiling(&self) -> bool {
        self.used <= self.ceiling
    }
}

/// The sections a prompt is assembled from, before rendering.
#[derive(Debug, Clone)]
pub struct PromptSections {
    pub system: String,
    /// Rendered calendar and app-knowledge blocks. Never pruned.
    pub side_context: String,
    pub memories: Vec<MemoryItem>,
    pub documents: Vec<DocumentSnippet>,
    /// Chronological history, excluding the current turn.
    pub history: Vec<ConversationMessage>,
    /// The in-flight user turn.
    pub current: ConversationMessage,
    /// Estimated cost of the tool definitions sent alongside the prompt.
    pub tool_tokens: usize,
}

impl PromptSections {
    pub fn estimate(&self) -> usize {
        estimate(&self.system)
            + estimate(&self.side_context)
            + estimate(&injection::render_memories(&self.memories))
            + estimate(&injection::render_documents(&self.documents))
            + estimate_messages(&self.history)
            + estimate_message(&self.current)
            + self.tool_tokens
    }

    /// Ids of the memories still present; these are what gets reinforced.
    pub fn memory_ids(&self) -> Vec<String> {
        self.memories.iter().map(|m| m.id.clone()).collect()
    }
}

/// Prune `sections` in place until they fit `ceiling` (with margin) or
/// nothing strippable is left.
pub fn enforce(sections: &mut PromptSections, ceiling: usize, keep_recent: usize) -> BudgetReport {
    let before = sections.estimate();
    let mut budget = TokenBudget::new(ceiling, before);
    let mut steps = Vec::new();

    // 1. Raw document text.
    while !budget.within_target() && !sections.documents.is_empty() {
        let idx = lowest_ranked(&sections.documents);
        let doc = sections.documents.remove(idx);
        steps.push(PruneStep::Document { document_id: doc.document_id });
        budget.used = sections.estimate();
    }
    for i in 0..sections.current.attachments.len() {
        if budget.within_target() {
            break;
        }
        let att = &mut sections.current.attachments[i];
        if att.text.is_none() {
            continue;
        }
        att.text = Some(injection::omitted_attachment_marker(&att.name));
        steps.push(PruneStep::AttachmentText { name: att.name.clone() });
        budget.used = sections.estimate();
    }

    // 2. Oldest half of memory.
    if !budget.within_target() && !sections.memories.is_empty() {
        sections.memories.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let dropped = sections.memories.len().div_ceil(2);
        sections.memories.drain(..dropped);
        steps.push(PruneStep::MemoryHalf { dropped });
        budget.used = sections.estimate();
    }

    // 3. Oldest turns beyond the most recent `keep_recent`.
    while !budget.within_target() && sections.history.len() > keep_recent {
        let msg = sections.history.remove(0);
        steps.push(PruneStep::Turn { message_id: msg.id });
        budget.used = sections.estimate();
    }

    if !budget.within_ceiling() {
        tracing::warn!(
            ceiling,
            estimated = budget.used,
            "prompt still exceeds ceiling after pruning; dispatching anyway"
        );
    }

    BudgetReport {
        ceiling,
        before,
        after: budget.used,
        steps,
        within_ceiling: budget.within_ceiling(),
    }
}

fn lowest_ranked(docs: &[DocumentSnippet]) -> usize {
    let mut idx = 0;
    for (i, d) in docs.iter().enumerate() {
        if d.score < docs[idx].score {
            idx = i;
        }
    }
    idx
}
