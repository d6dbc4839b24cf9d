//! Character-based token estimation.
//!
//! A crude `chars / 4` heuristic. It deliberately stays coarse: the 20%
//! window margin and the 10% enforcement margin absorb its error, so
//! budgets are kept conservative instead of tokenizer-exact.

use cg_domain::conversation::ConversationMessage;

/// Average characters per token for mixed English text.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated tokens for `text`, rounded up.
pub fn estimate(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimated tokens for a stored message, including extracted
/// attachment text.
pub fn estimate_message(msg: &ConversationMessage) -> usize {
    estimate(&msg.content)
        + msg
            .attachments
            .iter()
            .filter_map(|a| a.text.as_deref())
            .map(estimate)
            .sum::<usize>()
}

pub fn estimate_messages(msgs: &[ConversationMessage]) -> usize {
    msgs.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::conversation::Attachment;
    use cg_domain::tool::Role;

    #[test]
    fn rounds_up() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("a"), 1);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        // 4 multi-byte chars = 1 token, not 3.
        assert_eq!(estimate("日本語字"), 1);
    }

    #[test]
    fn attachment_text_counts_toward_message() {
        let mut msg = ConversationMessage::new("t", Role::User, "abcd");
        msg.attachments.push(Attachment {
            name: "notes.txt".into(),
            mime: "text/plain".into(),
            data: None,
            url: None,
            text: Some("x".repeat(40)),
        });
        assert_eq!(estimate_message(&msg), 11);
    }
}
