//! Error taxonomy for the chat pipeline.
//!
//! Only [`ChatError`] ever reaches the caller. Retrieval failures are logged
//! and swallowed inside `retrieval`, and malformed bodies are absorbed by the
//! normalizer. A body that cannot be read at all (too large, broken stream)
//! is still answered with an `ErrorBody`.

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::ErrorBody;

const DETAIL_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Missing {0}")]
  MissingCredential(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
  #[error("retrieval request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("retrieval service returned status {0}")]
  Status(u16),
  #[error("retrieval response malformed: {0}")]
  Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
  #[error("{0}")]
  Http(reqwest::Error),
  #[error("provider returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("provider response malformed: {0}")]
  Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
  fn from(err: reqwest::Error) -> Self {
    // Request URLs can carry credentials in query strings.
    ProviderError::Http(err.without_url())
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("Invalid request body")]
  Body(#[from] BytesRejection),
  #[error("Chat failed")]
  Provider {
    #[source]
    source: ProviderError,
    /// Credential to scrub from the detail string.
    secret: Option<String>,
  },
}

impl ChatError {
  pub fn provider(source: ProviderError, secret: Option<&str>) -> Self {
    ChatError::Provider {
      source,
      secret: secret.map(str::to_string),
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ChatError::Body(rejection) => rejection.status(),
      ChatError::Config(_) | ChatError::Provider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn body(&self) -> ErrorBody {
    match self {
      ChatError::Config(err) => ErrorBody {
        error: err.to_string(),
        detail: None,
      },
      ChatError::Body(rejection) => ErrorBody {
        error: self.to_string(),
        detail: Some(rejection.body_text()),
      },
      ChatError::Provider { source, secret } => ErrorBody {
        error: self.to_string(),
        detail: Some(redact(&source.to_string(), secret.as_deref())),
      },
    }
  }
}

impl IntoResponse for ChatError {
  fn into_response(self) -> Response {
    (self.status(), Json(self.body())).into_response()
  }
}

fn redact(detail: &str, secret: Option<&str>) -> String {
  let mut cleaned = match secret {
    Some(secret) if !secret.is_empty() => detail.replace(secret, "[redacted]"),
    _ => detail.to_string(),
  };
  if cleaned.chars().count() > DETAIL_LIMIT {
    cleaned = cleaned.chars().take(DETAIL_LIMIT).collect::<String>() + "...";
  }
  cleaned
}
