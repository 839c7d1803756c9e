use std::sync::Arc;

use crate::error::ChatError;
use crate::models::ChatRequest;
use crate::normalize::latest_user_query;
use crate::prompt::{assemble, guard_instruction};
use crate::providers::{ChatProvider, GenerationParams};
use crate::retrieval::Retriever;

pub const FALLBACK_REPLY: &str = "Sorry, I couldn't answer.";

/// One pass from a normalized request to reply text.
///
/// Retrieval always completes (possibly empty) before the provider is called.
/// Only a missing credential or a provider failure ends the request early.
pub struct ChatPipeline {
  pub retriever: Retriever,
  pub provider: Arc<dyn ChatProvider>,
  pub scope: String,
  pub params: GenerationParams,
}

impl ChatPipeline {
  pub async fn respond(&self, request: ChatRequest) -> Result<String, ChatError> {
    self.provider.check_configured()?;

    let query = latest_user_query(&request.messages);
    let snippets = self.retriever.retrieve(&query, request.route.as_deref()).await;
    let guard = guard_instruction(&self.scope, &snippets);

    let caps = self.provider.capabilities();
    let conversation = assemble(
      &request.messages,
      &guard,
      request.screenshot.as_deref(),
      caps.guard_placement(),
      caps.attachment_style(),
    );

    tracing::info!(
      provider = self.provider.name(),
      model = self.provider.model(),
      turns = conversation.len(),
      snippets = snippets.len(),
      screenshot = request.screenshot.is_some(),
      "calling model provider"
    );

    let text = self
      .provider
      .generate(&conversation, &self.params)
      .await
      .map_err(|err| {
        tracing::error!(provider = self.provider.name(), error = %err, "model provider call failed");
        ChatError::provider(err, self.provider.secret())
      })?;

    if text.trim().is_empty() {
      Ok(FALLBACK_REPLY.to_string())
    } else {
      Ok(text)
    }
  }
}
