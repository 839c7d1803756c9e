use crate::models::{ChatMessage, ContentPart, MessageContent, RetrievedSnippet, Role};

pub const NO_CONTEXT: &str = "(no relevant context found)";
pub const REFUSAL: &str = "I can only answer questions related to this website and its dashboards.";
pub const SCREENSHOT_PREFIX: &str = "Screenshot URL: ";

/// Where the guard instruction goes in the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardPlacement {
  /// A distinct leading `system` message.
  SystemMessage,
  /// Prepended to the text of the first `user` message.
  FirstUserMessage,
}

/// How a screenshot is carried on the latest user turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentStyle {
  ImagePart,
  TextReference,
}

#[derive(Clone, Copy, Debug)]
pub struct Attachment<'a> {
  pub payload: &'a str,
  pub style: AttachmentStyle,
}

pub fn context_block(snippets: &[RetrievedSnippet]) -> String {
  if snippets.is_empty() {
    return NO_CONTEXT.to_string();
  }
  snippets
    .iter()
    .map(|s| format!("• {}", s.text))
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn guard_instruction(scope: &str, snippets: &[RetrievedSnippet]) -> String {
  format!(
    "You are the assistant for {scope}. \
     Answer ONLY using the provided context. If the question is outside this website, reply: \"{REFUSAL}\" \
     Keep your answers clear, natural, and descriptive when users ask general questions. \
     Do not invent numbers; if statistics are requested, explain they can be found in the relevant dashboard.\n\n\
     Context:\n{}",
    context_block(snippets)
  )
}

pub fn place_guard(messages: &[ChatMessage], guard: &str, placement: GuardPlacement) -> Vec<ChatMessage> {
  let mut out = Vec::with_capacity(messages.len() + 1);
  match placement {
    GuardPlacement::SystemMessage => {
      out.push(ChatMessage::text(Role::System, guard));
      out.extend_from_slice(messages);
    }
    GuardPlacement::FirstUserMessage => {
      let first_user = messages.iter().position(|m| *m.role() == Role::User);
      let merged = first_user.and_then(|idx| merge_guard(messages[idx].content(), guard));
      match (first_user, merged) {
        (Some(idx), Some(content)) => {
          out.extend_from_slice(messages);
          out[idx] = messages[idx].with_content(content);
        }
        _ => {
          out.push(ChatMessage::text(Role::User, guard));
          out.extend_from_slice(messages);
        }
      }
    }
  }
  out
}

fn merge_guard(content: &MessageContent, guard: &str) -> Option<MessageContent> {
  match content {
    MessageContent::Text(text) => Some(MessageContent::Text(format!("{guard}\n\n{text}"))),
    MessageContent::Parts(parts) => {
      let mut merged = Vec::with_capacity(parts.len() + 1);
      merged.push(ContentPart::Text(guard.to_string()));
      merged.extend(parts.iter().cloned());
      Some(MessageContent::Parts(merged))
    }
    MessageContent::Other(_) => None,
  }
}

/// Return a copy of `messages` with the attachment added to the latest user turn.
///
/// That turn's content becomes `[text, attachment]`, where `text` is its prior
/// content flattened. Other fields on that turn are kept, and every other
/// message is copied as-is. Without a user turn the conversation is returned
/// unchanged.
pub fn with_attachment(messages: &[ChatMessage], attachment: &Attachment<'_>) -> Vec<ChatMessage> {
  let mut out = messages.to_vec();
  let Some(idx) = out.iter().rposition(|m| *m.role() == Role::User) else {
    tracing::debug!("screenshot supplied without a user turn, not attached");
    return out;
  };

  let extra = match attachment.style {
    AttachmentStyle::ImagePart => ContentPart::Image(attachment.payload.to_string()),
    AttachmentStyle::TextReference => ContentPart::Text(format!("{SCREENSHOT_PREFIX}{}", attachment.payload)),
  };
  let text = ContentPart::Text(out[idx].content().flatten_text());
  out[idx] = out[idx].with_content(MessageContent::Parts(vec![text, extra]));
  out
}

pub fn assemble(
  messages: &[ChatMessage],
  guard: &str,
  screenshot: Option<&str>,
  placement: GuardPlacement,
  style: AttachmentStyle,
) -> Vec<ChatMessage> {
  let guarded = place_guard(messages, guard, placement);
  match screenshot {
    Some(payload) => with_attachment(&guarded, &Attachment { payload, style }),
    None => guarded,
  }
}
