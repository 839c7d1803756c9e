use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
  User,
  Assistant,
  System,
  /// Any role string the caller sent that is not one of the three known kinds.
  /// Carried through to the provider unchanged.
  Other(String),
}

impl Role {
  pub fn as_str(&self) -> &str {
    match self {
      Role::User => "user",
      Role::Assistant => "assistant",
      Role::System => "system",
      Role::Other(raw) => raw,
    }
  }
}

impl From<&str> for Role {
  fn from(raw: &str) -> Self {
    match raw {
      "user" => Role::User,
      "assistant" => Role::Assistant,
      "system" => Role::System,
      other => Role::Other(other.to_string()),
    }
  }
}

impl Serialize for Role {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Role {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let raw = String::deserialize(deserializer)?;
    Ok(Role::from(raw.as_str()))
  }
}

/// One typed fragment of message content.
///
/// Only the exact `{type:"text", text}` and `{type:"image_url", image_url:{url}}`
/// shapes become `Text` and `Image`. Every other object, including text and
/// image parts that carry extra keys, is kept as `Opaque` so that it serializes
/// back exactly as it arrived. Read parts through [`ContentPart::text`] and
/// [`ContentPart::image_url`], which see through both forms.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
  Text(String),
  Image(String),
  Opaque(Value),
}

impl ContentPart {
  fn classify(value: Value) -> Self {
    match Self::recognise(&value) {
      Some(part) => part,
      None => ContentPart::Opaque(value),
    }
  }

  fn recognise(value: &Value) -> Option<Self> {
    let obj = value.as_object().filter(|obj| obj.len() == 2)?;
    match obj.get("type")?.as_str()? {
      "text" => obj.get("text")?.as_str().map(|text| ContentPart::Text(text.to_string())),
      "image_url" => {
        let inner = obj.get("image_url")?.as_object().filter(|inner| inner.len() == 1)?;
        inner.get("url")?.as_str().map(|url| ContentPart::Image(url.to_string()))
      }
      _ => None,
    }
  }

  /// Text of a `text` part, whatever other keys it carries.
  pub fn text(&self) -> Option<&str> {
    match self {
      ContentPart::Text(text) => Some(text),
      ContentPart::Image(_) => None,
      ContentPart::Opaque(value) => match value.get("type")?.as_str()? {
        "text" => value.get("text")?.as_str(),
        _ => None,
      },
    }
  }

  /// URL of an `image_url` part, whatever other keys it or its `image_url` carry.
  pub fn image_url(&self) -> Option<&str> {
    match self {
      ContentPart::Text(_) => None,
      ContentPart::Image(url) => Some(url),
      ContentPart::Opaque(value) => match value.get("type")?.as_str()? {
        "image_url" => value.get("image_url")?.get("url")?.as_str(),
        _ => None,
      },
    }
  }

  pub fn to_value(&self) -> Value {
    match self {
      ContentPart::Text(text) => serde_json::json!({ "type": "text", "text": text }),
      ContentPart::Image(url) => serde_json::json!({ "type": "image_url", "image_url": { "url": url } }),
      ContentPart::Opaque(value) => value.clone(),
    }
  }
}

impl Serialize for ContentPart {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.to_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for ContentPart {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    Value::deserialize(deserializer).map(ContentPart::classify)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
  Text(String),
  Parts(Vec<ContentPart>),
  Other(Value),
}

impl Default for MessageContent {
  fn default() -> Self {
    MessageContent::Text(String::new())
  }
}

impl MessageContent {
  /// Plain text view of the content: text parts joined by single spaces.
  pub fn flatten_text(&self) -> String {
    match self {
      MessageContent::Text(text) => text.clone(),
      MessageContent::Parts(parts) => parts
        .iter()
        .filter_map(ContentPart::text)
        .collect::<Vec<_>>()
        .join(" "),
      MessageContent::Other(_) => String::new(),
    }
  }
}

/// One conversation turn.
///
/// Turns that came from the caller keep the element exactly as it was sent and
/// serialize back to it, extra fields and all. `role` and `content` are typed
/// views for the assembler and the vendor adapters. An element without a
/// string `role` reads as `Role::Other("")`, and one without `content` reads as
/// empty text.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
  role: Role,
  content: MessageContent,
  raw: Option<Value>,
}

impl ChatMessage {
  pub fn new(role: Role, content: MessageContent) -> Self {
    Self { role, content, raw: None }
  }

  pub fn text(role: Role, text: impl Into<String>) -> Self {
    Self::new(role, MessageContent::Text(text.into()))
  }

  /// Wrap one element of the caller's `messages` array. Never fails.
  pub fn from_value(value: Value) -> Self {
    let role = match value.get("role").and_then(Value::as_str) {
      Some(raw) => Role::from(raw),
      None => Role::Other(String::new()),
    };
    let content = value
      .get("content")
      .map(|content| serde_json::from_value(content.clone()).unwrap_or_else(|_| MessageContent::Other(content.clone())))
      .unwrap_or_default();
    Self {
      role,
      content,
      raw: Some(value),
    }
  }

  pub fn role(&self) -> &Role {
    &self.role
  }

  pub fn content(&self) -> &MessageContent {
    &self.content
  }

  /// Copy of this turn with its content replaced. Other fields the caller
  /// sent on the turn are kept.
  pub fn with_content(&self, content: MessageContent) -> Self {
    let raw = match (&self.raw, serde_json::to_value(&content)) {
      (Some(Value::Object(obj)), Ok(value)) => {
        let mut obj = obj.clone();
        obj.insert("content".to_string(), value);
        Some(Value::Object(obj))
      }
      _ => None,
    };
    Self {
      role: self.role.clone(),
      content,
      raw,
    }
  }
}

impl Serialize for ChatMessage {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    if let Some(raw) = &self.raw {
      return raw.serialize(serializer);
    }
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("role", &self.role)?;
    map.serialize_entry("content", &self.content)?;
    map.end()
  }
}

impl<'de> Deserialize<'de> for ChatMessage {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    Value::deserialize(deserializer).map(ChatMessage::from_value)
  }
}

/// Canonical form of an inbound chat payload, built by `normalize::normalize`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
  pub messages: Vec<ChatMessage>,
  pub route: Option<String>,
  pub screenshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
  pub text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
  pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
  pub error: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
  pub ok: bool,
  pub provider: String,
  pub model: String,
  pub has_key: bool,
  pub rag_url: String,
  pub retrieval_enabled: bool,
}
