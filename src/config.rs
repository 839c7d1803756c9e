use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RAG_URL: &str = "http://localhost:8001/query";
pub const MAX_TEMPERATURE: f32 = 0.3;
pub const MAX_OUTPUT_TOKENS: u32 = 1024;
// Screenshots arrive inline as data URIs.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
  Gemini,
  OpenAi,
  Groq,
  Anthropic,
}

impl ProviderKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ProviderKind::Gemini => "gemini",
      ProviderKind::OpenAi => "openai",
      ProviderKind::Groq => "groq",
      ProviderKind::Anthropic => "anthropic",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "gemini" | "google" => Some(ProviderKind::Gemini),
      "openai" => Some(ProviderKind::OpenAi),
      "groq" => Some(ProviderKind::Groq),
      "anthropic" | "claude" => Some(ProviderKind::Anthropic),
      _ => None,
    }
  }

  /// Prefix of the environment variables that configure this provider.
  pub fn env_prefix(&self) -> &'static str {
    match self {
      ProviderKind::Gemini => "GEMINI",
      ProviderKind::OpenAi => "OPENAI",
      ProviderKind::Groq => "GROQ",
      ProviderKind::Anthropic => "ANTHROPIC",
    }
  }

  /// Name of the environment variable holding the credential.
  pub fn key_var(&self) -> &'static str {
    match self {
      ProviderKind::Gemini => "GEMINI_API_KEY",
      ProviderKind::OpenAi => "OPENAI_API_KEY",
      ProviderKind::Groq => "GROQ_API_KEY",
      ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
    }
  }

  pub fn default_model(&self) -> &'static str {
    match self {
      ProviderKind::Gemini => "gemini-2.0-flash-lite",
      ProviderKind::OpenAi => "gpt-4o-mini",
      ProviderKind::Groq => "llama-3.1-8b-instant",
      ProviderKind::Anthropic => "claude-3-5-haiku-latest",
    }
  }

  pub fn default_base_url(&self) -> &'static str {
    match self {
      ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
      ProviderKind::OpenAi => "https://api.openai.com/v1",
      ProviderKind::Groq => "https://api.groq.com/openai/v1",
      ProviderKind::Anthropic => "https://api.anthropic.com",
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ProviderSettings {
  pub kind: ProviderKind,
  pub model: Option<String>,
  pub base_url: Option<String>,
  #[serde(skip_serializing)]
  pub api_key: Option<String>,
  /// Whether the model accepts image parts. Groq's text models do not.
  pub vision: Option<bool>,
}

impl Default for ProviderSettings {
  fn default() -> Self {
    Self {
      kind: ProviderKind::Gemini,
      model: None,
      base_url: None,
      api_key: None,
      vision: None,
    }
  }
}

impl ProviderSettings {
  pub fn model(&self) -> String {
    self
      .model
      .clone()
      .filter(|m| !m.trim().is_empty())
      .unwrap_or_else(|| self.kind.default_model().to_string())
  }

  pub fn base_url(&self) -> String {
    self
      .base_url
      .clone()
      .filter(|u| !u.trim().is_empty())
      .unwrap_or_else(|| self.kind.default_base_url().to_string())
      .trim_end_matches('/')
      .to_string()
  }

  pub fn api_key(&self) -> Option<&str> {
    self.api_key.as_deref().filter(|k| !k.trim().is_empty())
  }

  pub fn vision(&self) -> bool {
    self.vision.unwrap_or(self.kind != ProviderKind::Groq)
  }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AppConfig {
  pub rag_url: String,
  pub rag_top_k: usize,
  pub assistant_scope: String,
  pub temperature: f32,
  pub max_output_tokens: u32,
  /// Largest accepted chat request body.
  pub max_body_bytes: usize,
  pub provider: ProviderSettings,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      rag_url: DEFAULT_RAG_URL.to_string(),
      rag_top_k: 5,
      assistant_scope: "the Heartland Community Network Data Library".to_string(),
      temperature: 0.2,
      max_output_tokens: 600,
      max_body_bytes: DEFAULT_MAX_BODY_BYTES,
      provider: ProviderSettings::default(),
    }
  }
}

impl AppConfig {
  /// Overlay deployment settings read through `var`.
  ///
  /// The provider is picked first so that its `<P>_API_KEY`, `<P>_MODEL` and
  /// `<P>_BASE_URL` variables are the ones consulted.
  pub fn apply_env<F>(&mut self, var: F)
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(raw) = var("CHAT_PROVIDER") {
      match ProviderKind::parse(&raw) {
        Some(kind) => {
          if kind != self.provider.kind {
            self.provider = ProviderSettings {
              kind,
              ..ProviderSettings::default()
            };
          }
        }
        None => tracing::warn!(provider = %raw, "unknown CHAT_PROVIDER, keeping {}", self.provider.kind.as_str()),
      }
    }

    let prefix = self.provider.kind.env_prefix();
    if let Some(key) = var(self.provider.kind.key_var()) {
      self.provider.api_key = Some(key);
    }
    if let Some(model) = var(&format!("{prefix}_MODEL")) {
      self.provider.model = Some(model);
    }
    if let Some(url) = var(&format!("{prefix}_BASE_URL")) {
      self.provider.base_url = Some(url);
    }

    if let Some(url) = var("RAG_URL") {
      self.rag_url = url;
    }
    if let Some(k) = var("RAG_TOP_K").and_then(|v| v.trim().parse().ok()) {
      self.rag_top_k = k;
    }
    if let Some(t) = var("CHAT_TEMPERATURE").and_then(|v| v.trim().parse().ok()) {
      self.temperature = t;
    }
    if let Some(n) = var("CHAT_MAX_TOKENS").and_then(|v| v.trim().parse().ok()) {
      self.max_output_tokens = n;
    }
    if let Some(n) = var("CHAT_MAX_BODY_BYTES").and_then(|v| v.trim().parse().ok()) {
      self.max_body_bytes = n;
    }
  }

  /// Clamp sampling parameters into the ranges this service allows.
  pub fn enforce_limits(&mut self) {
    if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
      let clamped = if self.temperature.is_nan() {
        0.2
      } else {
        self.temperature.clamp(0.0, MAX_TEMPERATURE)
      };
      tracing::warn!(requested = self.temperature, used = clamped, "temperature out of range");
      self.temperature = clamped;
    }
    if self.max_output_tokens == 0 || self.max_output_tokens > MAX_OUTPUT_TOKENS {
      let clamped = self.max_output_tokens.clamp(1, MAX_OUTPUT_TOKENS);
      tracing::warn!(requested = self.max_output_tokens, used = clamped, "max output tokens out of range");
      self.max_output_tokens = clamped;
    }
    if self.rag_top_k == 0 {
      self.rag_top_k = 5;
    }
    if self.max_body_bytes == 0 {
      self.max_body_bytes = DEFAULT_MAX_BODY_BYTES;
    }
  }

  pub fn retrieval_enabled(&self) -> bool {
    !self.rag_url.trim().is_empty()
  }
}

/// Load the config file when one is given, then overlay the process environment.
pub fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
  let mut config = match path {
    Some(path) => {
      let data = std::fs::read_to_string(path)?;
      serde_json::from_str::<AppConfig>(&data)?
    }
    None => AppConfig::default(),
  };
  config.apply_env(|key| std::env::var(key).ok());
  config.enforce_limits();
  Ok(config)
}
