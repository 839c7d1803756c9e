use serde_json::Value;

use crate::models::{ChatMessage, ChatRequest, Role};

/// Reshape a raw request body into a `ChatRequest`.
///
/// Never fails: a body that is not JSON is treated as `{}`, and fields of the
/// wrong type fall back to their defaults. Every element of `messages` is kept,
/// however it is shaped. An empty `screenshot` counts as absent.
pub fn normalize(body: &[u8]) -> ChatRequest {
  let value = serde_json::from_slice::<Value>(body).unwrap_or_else(|err| {
    tracing::debug!(error = %err, "chat body is not JSON, using defaults");
    Value::Object(Default::default())
  });

  let messages = match value.get("messages") {
    Some(Value::Array(items)) => items.iter().cloned().map(ChatMessage::from_value).collect(),
    _ => Vec::new(),
  };

  ChatRequest {
    messages,
    route: string_field(&value, "route"),
    screenshot: string_field(&value, "screenshot").filter(|shot| !shot.trim().is_empty()),
  }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
  value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Text of the last user-authored message, or an empty string when there is none.
pub fn latest_user_query(messages: &[ChatMessage]) -> String {
  messages
    .iter()
    .rev()
    .find(|m| *m.role() == Role::User)
    .map(|m| m.content().flatten_text())
    .unwrap_or_default()
}
