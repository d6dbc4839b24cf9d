//! Exhaustive-ish checks of the window and budget invariants over a grid
//! of deterministic histories.

use cg_contextpack::budget::{enforce, PromptSections};
use cg_contextpack::tokens::{estimate_message, estimate_messages};
use cg_contextpack::window;
use cg_domain::conversation::ConversationMessage;
use cg_domain::tool::Role;

fn ids(msgs: &[ConversationMessage]) -> Vec<&str> {
    msgs.iter().map(|m| m.id.as_str()).collect()
}

/// Deterministic pseudo-random sizes (LCG) so failures are reproducible.
fn history(len: usize, seed: u64) -> Vec<ConversationMessage> {
    let mut state = seed;
    (0..len)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let chars = 1 + (state >> 33) as usize % 3000;
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let mut m = ConversationMessage::new("t", role, "x".repeat(chars));
            m.id = format!("m{i}");
            m
        })
        .collect()
}

#[test]
fn window_is_suffix_within_margin() {
    for seed in 1..40u64 {
        for len in [0usize, 1, 2, 7, 50, 200] {
            let h = history(len, seed);
            for budget in [0usize, 10, 500, 4000, 100_000] {
                let w = window::build(&h, budget);
                // Suffix.
                assert_eq!(ids(w), ids(&h[h.len() - w.len()..]));
                if len > 0 {
                    assert!(!w.is_empty(), "non-empty history must give non-empty window");
                }
                if w.len() > 1 {
                    assert!(estimate_messages(w) as f64 <= budget as f64 * 0.8);
                }
                // Maximal: the next older message would not have fit.
                if w.len() < h.len() && !w.is_empty() {
                    let next = &h[h.len() - w.len() - 1];
                    let with_next = estimate_messages(w) + estimate_message(next);
                    assert!(with_next as f64 > (budget as f64 * 0.8).floor());
                }
            }
        }
    }
}

#[test]
fn enforcement_never_drops_recent_turns() {
    for seed in 1..20u64 {
        let h = history(30, seed);
        let mut s = PromptSections {
            system: "system".into(),
            side_context: String::new(),
            memories: Vec::new(),
            documents: Vec::new(),
            history: h.clone(),
            current: ConversationMessage::new("t", Role::User, "now"),
            tool_tokens: 0,
        };
        let report = enforce(&mut s, 1, 5);
        assert_eq!(s.history.len(), 5);
        assert_eq!(ids(&s.history), ids(&h[25..]));
        assert!(!report.within_ceiling);
        assert_eq!(report.after, s.estimate());
    }
}
