use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};

use super::{read_json, ChatProvider, GenerationParams, ProviderCapabilities};
use crate::config::{ProviderKind, ProviderSettings};
use crate::error::{ConfigError, ProviderError};
use crate::models::ChatMessage;

#[derive(serde::Serialize)]
struct CompletionRequest<'a> {
  model: &'a str,
  temperature: f32,
  max_tokens: u32,
  messages: &'a [ChatMessage],
}

/// OpenAI chat completions, and any API that speaks the same dialect (Groq).
pub struct OpenAiCompatible {
  http: reqwest::Client,
  kind: ProviderKind,
  base_url: String,
  model: String,
  api_key: Option<String>,
  vision: bool,
}

impl OpenAiCompatible {
  pub fn new(http: reqwest::Client, settings: &ProviderSettings) -> Self {
    Self {
      http,
      kind: settings.kind,
      base_url: settings.base_url(),
      model: settings.model(),
      api_key: settings.api_key().map(str::to_string),
      vision: settings.vision(),
    }
  }
}

#[async_trait]
impl ChatProvider for OpenAiCompatible {
  fn name(&self) -> &str {
    self.kind.as_str()
  }

  fn model(&self) -> &str {
    &self.model
  }

  fn capabilities(&self) -> ProviderCapabilities {
    ProviderCapabilities {
      system_role: true,
      inline_images: self.vision,
    }
  }

  fn check_configured(&self) -> Result<(), ConfigError> {
    match self.api_key {
      Some(_) => Ok(()),
      None => Err(ConfigError::MissingCredential(self.kind.key_var())),
    }
  }

  fn secret(&self) -> Option<&str> {
    self.api_key.as_deref()
  }

  async fn generate(&self, conversation: &[ChatMessage], params: &GenerationParams) -> Result<String, ProviderError> {
    let key = self.api_key.as_deref().unwrap_or_default();
    let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
      .map_err(|_| ProviderError::Malformed("credential is not a valid header value".to_string()))?;

    let payload = CompletionRequest {
      model: &self.model,
      temperature: params.temperature,
      max_tokens: params.max_tokens,
      messages: conversation,
    };

    let resp = self
      .http
      .post(format!("{}/chat/completions", self.base_url))
      .header(AUTHORIZATION, bearer)
      .json(&payload)
      .send()
      .await?;

    let json_body = read_json(resp).await?;
    Ok(
      json_body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string(),
    )
  }
}
