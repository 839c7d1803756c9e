//! Model providers behind one `generate` contract.
//!
//! Each vendor module translates the assembled conversation into its own wire
//! format. Which vendor is used is a deployment decision (`AppConfig::provider`).

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;

use crate::config::{AppConfig, ProviderKind};
use crate::error::{ConfigError, ProviderError};
use crate::models::ChatMessage;
use crate::prompt::{AttachmentStyle, GuardPlacement};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
  pub temperature: f32,
  pub max_tokens: u32,
}

impl GenerationParams {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      temperature: config.temperature,
      max_tokens: config.max_output_tokens,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderCapabilities {
  /// Accepts a leading `system` message (or an equivalent top-level field).
  pub system_role: bool,
  /// Accepts image parts on user turns.
  pub inline_images: bool,
}

impl ProviderCapabilities {
  pub fn guard_placement(&self) -> GuardPlacement {
    if self.system_role {
      GuardPlacement::SystemMessage
    } else {
      GuardPlacement::FirstUserMessage
    }
  }

  pub fn attachment_style(&self) -> AttachmentStyle {
    if self.inline_images {
      AttachmentStyle::ImagePart
    } else {
      AttachmentStyle::TextReference
    }
  }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model(&self) -> &str;
  fn capabilities(&self) -> ProviderCapabilities;

  /// Fails when a credential needed for `generate` is absent.
  fn check_configured(&self) -> Result<(), ConfigError>;

  /// Credential value, used only to scrub it from error details.
  fn secret(&self) -> Option<&str> {
    None
  }

  async fn generate(&self, conversation: &[ChatMessage], params: &GenerationParams) -> Result<String, ProviderError>;
}

pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Arc<dyn ChatProvider> {
  let settings = &config.provider;
  match settings.kind {
    ProviderKind::OpenAi | ProviderKind::Groq => Arc::new(openai::OpenAiCompatible::new(http, settings)),
    ProviderKind::Gemini => Arc::new(gemini::Gemini::new(http, settings)),
    ProviderKind::Anthropic => Arc::new(anthropic::Anthropic::new(http, settings)),
  }
}

/// Pieces of a `data:` URI, with the payload always base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
  pub mime: String,
  pub base64: String,
}

impl DataUri {
  pub fn parse(raw: &str) -> Option<Self> {
    let rest = raw.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let (mime, is_base64) = match header.strip_suffix(";base64") {
      Some(mime) => (mime, true),
      None => (header, false),
    };
    let mime = if mime.is_empty() { "image/png" } else { mime };
    let base64 = if is_base64 {
      data.to_string()
    } else {
      base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
    };
    Some(Self {
      mime: mime.to_string(),
      base64,
    })
  }
}

pub(crate) async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, ProviderError> {
  if !resp.status().is_success() {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    return Err(ProviderError::Status { status, body });
  }
  let bytes = resp.bytes().await?;
  serde_json::from_slice(&bytes).map_err(|err| ProviderError::Malformed(err.to_string()))
}
