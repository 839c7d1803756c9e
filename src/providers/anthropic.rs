use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::{read_json, ChatProvider, DataUri, GenerationParams, ProviderCapabilities};
use crate::config::{ProviderKind, ProviderSettings};
use crate::error::{ConfigError, ProviderError};
use crate::models::{ChatMessage, ContentPart, MessageContent, Role};

const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  system: Option<String>,
  messages: Vec<AnthropicMessage>,
}

#[derive(Serialize, Debug)]
struct AnthropicMessage {
  role: String,
  content: Value,
}

pub struct Anthropic {
  http: reqwest::Client,
  base_url: String,
  model: String,
  api_key: Option<String>,
}

impl Anthropic {
  pub fn new(http: reqwest::Client, settings: &ProviderSettings) -> Self {
    Self {
      http,
      base_url: settings.base_url(),
      model: settings.model(),
      api_key: settings.api_key().map(str::to_string),
    }
  }
}

/// Split the conversation into the top-level `system` text and the turns.
fn build_messages(conversation: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
  let system: Vec<String> = conversation
    .iter()
    .filter(|m| *m.role() == Role::System)
    .map(|m| m.content().flatten_text())
    .collect();

  let messages = conversation
    .iter()
    .filter(|m| *m.role() != Role::System)
    .map(|m| AnthropicMessage {
      role: m.role().as_str().to_string(),
      content: to_content(m.content()),
    })
    .collect();

  let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };
  (system, messages)
}

fn to_content(content: &MessageContent) -> Value {
  match content {
    MessageContent::Text(text) => Value::String(text.clone()),
    MessageContent::Parts(parts) => Value::Array(parts.iter().map(to_block).collect()),
    MessageContent::Other(value) => value.clone(),
  }
}

/// Text and `image_url` parts become Messages API blocks; any other part is
/// forwarded as sent.
fn to_block(part: &ContentPart) -> Value {
  if let Some(text) = part.text() {
    return json!({ "type": "text", "text": text });
  }
  match part.image_url() {
    Some(url) => match DataUri::parse(url) {
      Some(uri) => json!({
        "type": "image",
        "source": { "type": "base64", "media_type": uri.mime, "data": uri.base64 }
      }),
      None => json!({ "type": "image", "source": { "type": "url", "url": url } }),
    },
    None => part.to_value(),
  }
}

#[async_trait]
impl ChatProvider for Anthropic {
  fn name(&self) -> &str {
    ProviderKind::Anthropic.as_str()
  }

  fn model(&self) -> &str {
    &self.model
  }

  fn capabilities(&self) -> ProviderCapabilities {
    ProviderCapabilities {
      system_role: true,
      inline_images: true,
    }
  }

  fn check_configured(&self) -> Result<(), ConfigError> {
    match self.api_key {
      Some(_) => Ok(()),
      None => Err(ConfigError::MissingCredential(ProviderKind::Anthropic.key_var())),
    }
  }

  fn secret(&self) -> Option<&str> {
    self.api_key.as_deref()
  }

  async fn generate(&self, conversation: &[ChatMessage], params: &GenerationParams) -> Result<String, ProviderError> {
    let (system, messages) = build_messages(conversation);
    let payload = MessagesRequest {
      model: &self.model,
      max_tokens: params.max_tokens,
      temperature: params.temperature,
      system,
      messages,
    };

    let resp = self
      .http
      .post(format!("{}/v1/messages", self.base_url))
      .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
      .header("anthropic-version", API_VERSION)
      .json(&payload)
      .send()
      .await?;

    let json_body = read_json(resp).await?;
    let text = json_body["content"]
      .as_array()
      .map(|blocks| {
        blocks
          .iter()
          .filter(|b| b["type"] == "text")
          .filter_map(|b| b["text"].as_str())
          .collect::<Vec<_>>()
          .join("")
      })
      .unwrap_or_default();
    Ok(text)
  }
}
