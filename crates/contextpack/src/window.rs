//! Token-bounded conversation window.

use cg_domain::conversation::ConversationMessage;

use crate::tokens::estimate_message;

/// Share of the budget the window may fill. The remaining 20% is headroom
/// for estimator error.
pub const WINDOW_MARGIN: f64 = 0.8;

/// Select the longest suffix of `history` whose estimated size fits in
/// `budget * 0.8`.
///
/// Messages are never split. When even the newest message alone exceeds
/// the margin it is returned by itself, so a non-empty history always
/// yields a non-empty window.
pub fn build(history: &[ConversationMessage], budget: usize) -> &[ConversationMessage] {
    let limit = (budget as f64 * WINDOW_MARGIN).floor() as usize;
    let mut used = 0usize;
    let mut start = history.len();

    for (i, msg) in history.iter().enumerate().rev() {
        let cost = estimate_message(msg);
        if used + cost > limit {
            break;
        }
        used += cost;
        start = i;
    }

    if start == history.len() && !history.is_empty() {
        start = history.len() - 1;
    }
    &history[start..]
}

/// Remove the in-flight message from loaded history so it can be
/// re-inserted as the final turn.
pub fn exclude_in_flight(
    history: Vec<ConversationMessage>,
    in_flight_id: &str,
) -> Vec<ConversationMessage> {
    history.into_iter().filter(|m| m.id != in_flight_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::estimate_messages;
    use cg_domain::tool::Role;

    fn msgs(sizes: &[usize]) -> Vec<ConversationMessage> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                let mut m = ConversationMessage::new("t", role, "x".repeat(*n));
                m.id = format!("m{i}");
                m
            })
            .collect()
    }

    #[test]
    fn empty_history_gives_empty_window() {
        assert!(build(&[], 1000).is_empty());
    }

    #[test]
    fn everything_fits() {
        let h = msgs(&[40, 40, 40]);
        assert_eq!(build(&h, 1000).len(), 3);
    }

    #[test]
    fn drops_oldest_first() {
        // 100 tokens each; limit = 250 → two newest.
        let h = msgs(&[400, 400, 400, 400]);
        let w = build(&h, 312);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].id, "m2");
        assert_eq!(w[1].id, "m3");
    }

    #[test]
    fn oversized_newest_is_returned_alone() {
        let h = msgs(&[4, 4, 4000]);
        let w = build(&h, 100);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].id, "m2");
    }

    #[test]
    fn stops_at_first_message_that_does_not_fit() {
        // Newest 10 tokens, then 300, then 10: the 300 blocks the older 10.
        let h = msgs(&[40, 1200, 40]);
        let w = build(&h, 100);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn two_hundred_messages_four_thousand_budget() {
        let h = msgs(&vec![200; 200]);
        let w = build(&h, 4000);
        // 50 tokens each, limit 3200 → 64 messages.
        assert_eq!(w.len(), 64);
        assert!(estimate_messages(w) <= 3200);
        assert_eq!(w.last().map(|m| m.id.as_str()), Some("m199"));
    }

    #[test]
    fn exclude_in_flight_preserves_order() {
        let h = msgs(&[1, 1, 1]);
        let kept = exclude_in_flight(h, "m1");
        let ids: Vec<_> = kept.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m2"]);
    }
}
