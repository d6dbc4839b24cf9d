use cg_domain::capability::Capability;
use cg_domain::conversation::{Attachment, ConversationMessage};
use cg_domain::tool::{ContentPart, Message, Role};

use crate::budget::PromptSections;
use crate::injection;

/// Turns pruned [`PromptSections`] into provider-agnostic messages.
///
/// Layout: one system message (instructions, memory, documents,
/// side-context), then the history window, then the current user turn
/// as the final message.
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn assemble(sections: &PromptSections) -> Vec<Message> {
        let mut messages = Vec::with_capacity(sections.history.len() + 2);
        messages.push(Message::system(Self::system_text(sections)));

        for msg in &sections.history {
            match msg.role {
                Role::User => messages.push(user_turn(msg)),
                Role::Assistant => messages.push(Message::assistant(msg.content.clone())),
                // System and tool rows are bookkeeping, not dialogue.
                Role::System | Role::Tool => {}
            }
        }
        messages.push(user_turn(&sections.current));
        messages
    }

    pub fn system_text(sections: &PromptSections) -> String {
        let mut out = sections.system.trim_end().to_string();
        for block in [
            injection::render_memories(&sections.memories),
            injection::render_documents(&sections.documents),
            sections.side_context.clone(),
        ] {
            if !block.is_empty() {
                out.push_str("\n\n");
                out.push_str(block.trim_end());
            }
        }
        out
    }
}

fn user_turn(msg: &ConversationMessage) -> Message {
    if msg.attachments.is_empty() {
        return Message::user(msg.content.clone());
    }
    let mut parts = vec![ContentPart::Text { text: msg.content.clone() }];
    for att in &msg.attachments {
        if let Some(part) = attachment_part(att) {
            parts.push(part);
        }
    }
    Message::user_parts(parts)
}

fn attachment_part(att: &Attachment) -> Option<ContentPart> {
    if let Some(ref text) = att.text {
        return Some(ContentPart::Text {
            text: format!("--- {} ---\n{}", att.name, text),
        });
    }
    match att.capability() {
        Capability::Image => {
            let url = match (&att.data, &att.url) {
                (Some(data), _) => format!("data:{};base64,{}", att.mime, data),
                (None, Some(url)) => url.clone(),
                (None, None) => return None,
            };
            Some(ContentPart::Image { url, media_type: Some(att.mime.clone()) })
        }
        _ => att.url.as_ref().map(|url| ContentPart::Text {
            text: format!("[attached {}: {}]", att.name, url),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::tool::MessageContent;

    fn sections(history: Vec<ConversationMessage>, current: ConversationMessage) -> PromptSections {
        PromptSections {
            system: "Be kind.".into(),
            side_context: "=== CALENDAR ===\n- x\n=== END_CALENDAR ===\n".into(),
            memories: Vec::new(),
            documents: Vec::new(),
            history,
            current,
            tool_tokens: 0,
        }
    }

    #[test]
    fn current_turn_is_last() {
        let history = vec![
            ConversationMessage::new("t", Role::User, "hi"),
            ConversationMessage::new("t", Role::Assistant, "hello"),
            ConversationMessage::new("t", Role::System, "thread renamed"),
        ];
        let s = sections(history, ConversationMessage::new("t", Role::User, "how are you?"));
        let msgs = PromptAssembler::assemble(&s);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[3].content.text(), Some("how are you?"));
    }

    #[test]
    fn system_text_appends_side_context() {
        let s = sections(Vec::new(), ConversationMessage::new("t", Role::User, "q"));
        let text = PromptAssembler::system_text(&s);
        assert!(text.starts_with("Be kind."));
        assert!(text.contains("=== CALENDAR ==="));
    }

    #[test]
    fn image_attachment_becomes_data_url() {
        let mut cur = ConversationMessage::new("t", Role::User, "what is this?");
        cur.attachments.push(Attachment {
            name: "cat.png".into(),
            mime: "image/png".into(),
            data: Some("AAAA".into()),
            url: None,
            text: None,
        });
        let msgs = PromptAssembler::assemble(&sections(Vec::new(), cur));
        match &msgs[1].content {
            MessageContent::Parts(parts) => match &parts[1] {
                ContentPart::Image { url, .. } => assert_eq!(url, "data:image/png;base64,AAAA"),
                other => panic!("unexpected part {other:?}"),
            },
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }
}
