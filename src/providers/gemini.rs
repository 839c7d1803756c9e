use async_trait::async_trait;
use serde::Serialize;

use super::{read_json, ChatProvider, DataUri, GenerationParams, ProviderCapabilities};
use crate::config::{ProviderKind, ProviderSettings};
use crate::error::{ConfigError, ProviderError};
use crate::models::{ChatMessage, ContentPart, MessageContent, Role};
use crate::prompt::SCREENSHOT_PREFIX;

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum GeminiPart {
  Text {
    text: String,
  },
  Inline {
    #[serde(rename = "inlineData")]
    inline_data: InlineData,
  },
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct InlineData {
  mime_type: String,
  data: String,
}

#[derive(Serialize, Debug)]
struct GeminiContent {
  role: &'static str,
  parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  temperature: f32,
  max_output_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
  contents: Vec<GeminiContent>,
  generation_config: GenerationConfig,
}

/// Google Gemini `generateContent`.
///
/// Gemini has no `system` turn in `contents`, so the guard is merged into the
/// first user message and any caller-supplied system turn is sent as `user`.
pub struct Gemini {
  http: reqwest::Client,
  base_url: String,
  model: String,
  api_key: Option<String>,
}

impl Gemini {
  pub fn new(http: reqwest::Client, settings: &ProviderSettings) -> Self {
    Self {
      http,
      base_url: settings.base_url(),
      model: settings.model(),
      api_key: settings.api_key().map(str::to_string),
    }
  }
}

fn to_contents(conversation: &[ChatMessage]) -> Vec<GeminiContent> {
  conversation
    .iter()
    .map(|msg| GeminiContent {
      role: match msg.role() {
        Role::Assistant => "model",
        _ => "user",
      },
      parts: to_parts(msg.content()),
    })
    .collect()
}

fn to_parts(content: &MessageContent) -> Vec<GeminiPart> {
  let parts: Vec<GeminiPart> = match content {
    MessageContent::Text(text) => vec![GeminiPart::Text { text: text.clone() }],
    MessageContent::Parts(parts) => parts.iter().filter_map(to_part).collect(),
    MessageContent::Other(_) => Vec::new(),
  };
  if parts.is_empty() {
    vec![GeminiPart::Text { text: String::new() }]
  } else {
    parts
  }
}

fn to_part(part: &ContentPart) -> Option<GeminiPart> {
  if let Some(text) = part.text() {
    return Some(GeminiPart::Text { text: text.to_string() });
  }
  let url = part.image_url()?;
  Some(match DataUri::parse(url) {
    Some(uri) => GeminiPart::Inline {
      inline_data: InlineData {
        mime_type: uri.mime,
        data: uri.base64,
      },
    },
    // Hosted images cannot be fetched by generateContent; hand over the link.
    None => GeminiPart::Text {
      text: format!("{SCREENSHOT_PREFIX}{url}"),
    },
  })
}

fn reply_text(body: &serde_json::Value) -> String {
  body["candidates"][0]["content"]["parts"]
    .as_array()
    .map(|parts| {
      parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("")
    })
    .unwrap_or_default()
}

#[async_trait]
impl ChatProvider for Gemini {
  fn name(&self) -> &str {
    ProviderKind::Gemini.as_str()
  }

  fn model(&self) -> &str {
    &self.model
  }

  fn capabilities(&self) -> ProviderCapabilities {
    ProviderCapabilities {
      system_role: false,
      inline_images: true,
    }
  }

  fn check_configured(&self) -> Result<(), ConfigError> {
    match self.api_key {
      Some(_) => Ok(()),
      None => Err(ConfigError::MissingCredential(ProviderKind::Gemini.key_var())),
    }
  }

  fn secret(&self) -> Option<&str> {
    self.api_key.as_deref()
  }

  async fn generate(&self, conversation: &[ChatMessage], params: &GenerationParams) -> Result<String, ProviderError> {
    let payload = GenerateRequest {
      contents: to_contents(conversation),
      generation_config: GenerationConfig {
        temperature: params.temperature,
        max_output_tokens: params.max_tokens,
      },
    };

    let resp = self
      .http
      .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model))
      .header("x-goog-api-key", self.api_key.as_deref().unwrap_or_default())
      .json(&payload)
      .send()
      .await?;

    let json_body = read_json(resp).await?;
    Ok(reply_text(&json_body))
  }
}
