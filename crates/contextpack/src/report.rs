use serde::{Deserialize, Serialize};

use cg_domain::trace::TraceEvent;

/// One pruning action taken by the budget enforcer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PruneStep {
    Document { document_id: String },
    AttachmentText { name: String },
    MemoryHalf { dropped: usize },
    Turn { message_id: String },
}

impl PruneStep {
    fn label(&self) -> String {
        match self {
            PruneStep::Document { document_id } => format!("document:{document_id}"),
            PruneStep::AttachmentText { name } => format!("attachment:{name}"),
            PruneStep::MemoryHalf { dropped } => format!("memory:{dropped}"),
            PruneStep::Turn { message_id } => format!("turn:{message_id}"),
        }
    }
}

/// Outcome of one enforcement pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReport {
    pub ceiling: usize,
    /// Estimated tokens before pruning.
    pub before: usize,
    /// Estimated tokens after pruning.
    pub after: usize,
    pub steps: Vec<PruneStep>,
    /// False when nothing strippable was left and the prompt still
    /// exceeds the ceiling; the request proceeds anyway.
    pub within_ceiling: bool,
}

impl BudgetReport {
    pub fn pruned(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn trace(&self) -> TraceEvent {
        TraceEvent::BudgetEnforced {
            ceiling: self.ceiling,
            before: self.before,
            after: self.after,
            steps: self.steps.iter().map(PruneStep::label).collect(),
            within_ceiling: self.within_ceiling,
        }
    }
}
