use std::net::TcpListener;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::chat::ChatPipeline;
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::models::{ChatReply, DiagnosticsResponse};
use crate::normalize::normalize;

pub struct RouterState {
  pub started_at: Instant,
  pub started_at_utc: DateTime<Utc>,
  pub config: AppConfig,
  pub pipeline: ChatPipeline,
}

pub fn build_app(state: RouterState) -> Router {
  let body_limit = state.config.max_body_bytes;
  Router::new()
    .route("/health", get(health))
    .route("/api/chat", get(diagnostics).post(chat))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .with_state(Arc::new(state))
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  listener.set_nonblocking(true)?;
  let listener = tokio::net::TcpListener::from_std(listener)?;
  axum::serve(listener, build_app(state)).await?;
  Ok(())
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = state.started_at.elapsed().as_millis();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "uptime_ms": uptime,
    "started_at": state.started_at_utc.to_rfc3339(),
  }))
}

async fn diagnostics(State(state): State<Arc<RouterState>>) -> Json<DiagnosticsResponse> {
  let provider = &state.pipeline.provider;
  Json(DiagnosticsResponse {
    ok: true,
    provider: provider.name().to_string(),
    model: provider.model().to_string(),
    has_key: provider.check_configured().is_ok(),
    rag_url: state.config.rag_url.clone(),
    retrieval_enabled: state.config.retrieval_enabled(),
  })
}

async fn chat(State(state): State<Arc<RouterState>>, body: Result<Bytes, BytesRejection>) -> Response {
  let span = tracing::info_span!("chat", request_id = %uuid::Uuid::new_v4());

  async move {
    let body = match body {
      Ok(body) => body,
      Err(rejection) => {
        tracing::warn!(error = %rejection, "chat body could not be read");
        return ChatError::from(rejection).into_response();
      }
    };
    match state.pipeline.respond(normalize(&body)).await {
      Ok(reply) => (StatusCode::OK, Json(ChatReply { reply })).into_response(),
      Err(err) => err.into_response(),
    }
  }
  .instrument(span)
  .await
}

#[cfg(test)]
mod tests {
  use std::net::SocketAddr;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use mockito::Matcher;

  use super::*;
  use crate::chat::FALLBACK_REPLY;
  use crate::config::{ProviderKind, ProviderSettings};
  use crate::error::{ConfigError, ProviderError};
  use crate::models::{ChatMessage, ContentPart, MessageContent, Role};
  use crate::prompt::NO_CONTEXT;
  use crate::providers::{self, ChatProvider, GenerationParams, ProviderCapabilities};
  use crate::retrieval::Retriever;

  enum Outcome {
    Reply(&'static str),
    Fail,
  }

  struct StubProvider {
    outcome: Outcome,
    configured: bool,
    caps: ProviderCapabilities,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
  }

  impl StubProvider {
    fn replying(text: &'static str) -> Self {
      Self {
        outcome: Outcome::Reply(text),
        configured: true,
        caps: ProviderCapabilities {
          system_role: true,
          inline_images: true,
        },
        seen: Mutex::new(Vec::new()),
      }
    }

    fn last_conversation(&self) -> Vec<ChatMessage> {
      self.seen.lock().unwrap().last().cloned().expect("provider was not called")
    }

    fn calls(&self) -> usize {
      self.seen.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl ChatProvider for StubProvider {
    fn name(&self) -> &str {
      "stub"
    }

    fn model(&self) -> &str {
      "stub-model"
    }

    fn capabilities(&self) -> ProviderCapabilities {
      self.caps
    }

    fn check_configured(&self) -> Result<(), ConfigError> {
      if self.configured {
        Ok(())
      } else {
        Err(ConfigError::MissingCredential("STUB_API_KEY"))
      }
    }

    fn secret(&self) -> Option<&str> {
      Some("stub-secret")
    }

    async fn generate(&self, conversation: &[ChatMessage], params: &GenerationParams) -> Result<String, ProviderError> {
      assert!(params.temperature <= 0.3);
      self.seen.lock().unwrap().push(conversation.to_vec());
      match self.outcome {
        Outcome::Reply(text) => Ok(text.to_string()),
        Outcome::Fail => Err(ProviderError::Status {
          status: 502,
          body: "upstream rejected stub-secret".to_string(),
        }),
      }
    }
  }

  async fn start(provider: Arc<dyn ChatProvider>, rag_url: &str) -> SocketAddr {
    let config = AppConfig {
      rag_url: rag_url.to_string(),
      ..AppConfig::default()
    };
    start_with(provider, config).await
  }

  async fn start_with(provider: Arc<dyn ChatProvider>, config: AppConfig) -> SocketAddr {
    let pipeline = ChatPipeline {
      retriever: Retriever::new(reqwest::Client::new(), &config.rag_url, config.rag_top_k),
      provider,
      scope: config.assistant_scope.clone(),
      params: GenerationParams::from_config(&config),
    };
    let state = RouterState {
      started_at: Instant::now(),
      started_at_utc: Utc::now(),
      config,
      pipeline,
    };

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      run_router(listener, state).await.unwrap();
    });
    addr
  }

  async fn post_chat(addr: SocketAddr, body: serde_json::Value) -> (u16, serde_json::Value) {
    let resp = reqwest::Client::new()
      .post(format!("http://{addr}/api/chat"))
      .json(&body)
      .send()
      .await
      .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
  }

  async fn rag_stub(server: &mut mockito::ServerGuard, results: serde_json::Value) -> mockito::Mock {
    server
      .mock("POST", "/query")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(serde_json::json!({ "results": results }).to_string())
      .create_async()
      .await
  }

  #[tokio::test]
  async fn reply_round_trip_with_context() {
    let mut rag = mockito::Server::new_async().await;
    let rag_mock = rag
      .mock("POST", "/query")
      .match_body(Matcher::PartialJson(serde_json::json!({ "q": "What sectors are covered?", "k": 5 })))
      .with_status(200)
      .with_body(r#"{"results":[{"text":"Sector list: health, food, education."}]}"#)
      .create_async()
      .await;

    let stub = Arc::new(StubProvider::replying("ANSWER"));
    let addr = start(stub.clone(), &format!("{}/query", rag.url())).await;

    let (status, body) = post_chat(
      addr,
      serde_json::json!({ "messages": [{ "role": "user", "content": "What sectors are covered?" }] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::json!({ "reply": "ANSWER" }));
    rag_mock.assert_async().await;

    let sent = stub.last_conversation();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].role(), &Role::System);
    assert!(sent[0]
      .content()
      .flatten_text()
      .contains("• Sector list: health, food, education."));
    assert_eq!(
      serde_json::to_value(&sent[1]).unwrap(),
      serde_json::json!({ "role": "user", "content": "What sectors are covered?" })
    );
  }

  #[tokio::test]
  async fn guard_precedes_turns_in_original_order() {
    let mut rag = mockito::Server::new_async().await;
    let _m = rag_stub(&mut rag, serde_json::json!([])).await;
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub.clone(), &format!("{}/query", rag.url())).await;

    let turns = serde_json::json!([
      { "role": "user", "content": "one" },
      { "role": "assistant", "content": "two" },
      { "role": "user", "content": "three" }
    ]);
    let (status, _) = post_chat(addr, serde_json::json!({ "messages": turns, "route": "/sector-2" })).await;
    assert_eq!(status, 200);

    let sent = stub.last_conversation();
    assert_eq!(sent.iter().filter(|m| *m.role() == Role::System).count(), 1);
    assert_eq!(sent[0].role(), &Role::System);
    assert!(sent[0].content().flatten_text().ends_with(NO_CONTEXT));
    let originals: Vec<ChatMessage> = serde_json::from_value(turns).unwrap();
    assert_eq!(&sent[1..], &originals[..]);
  }

  #[tokio::test]
  async fn retrieval_outage_still_replies() {
    let stub = Arc::new(StubProvider::replying("ANSWER"));
    let addr = start(stub.clone(), "http://127.0.0.1:9/query").await;

    let (status, body) = post_chat(addr, serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] })).await;
    assert_eq!(status, 200);
    assert_eq!(body["reply"], "ANSWER");
    assert!(stub.last_conversation()[0].content().flatten_text().contains(NO_CONTEXT));
  }

  #[tokio::test]
  async fn provider_failure_is_structured_500() {
    let mut rag = mockito::Server::new_async().await;
    let _m = rag_stub(&mut rag, serde_json::json!([{ "text": "ctx" }])).await;
    let stub = Arc::new(StubProvider {
      outcome: Outcome::Fail,
      ..StubProvider::replying("")
    });
    let addr = start(stub, &format!("{}/query", rag.url())).await;

    let (status, body) = post_chat(addr, serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] })).await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "Chat failed");
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("502"));
    assert!(!detail.contains("stub-secret"));
  }

  #[tokio::test]
  async fn missing_credential_stops_before_outbound_calls() {
    let mut rag = mockito::Server::new_async().await;
    let rag_mock = rag.mock("POST", "/query").expect(0).create_async().await;
    let stub = Arc::new(StubProvider {
      configured: false,
      ..StubProvider::replying("never")
    });
    let addr = start(stub.clone(), &format!("{}/query", rag.url())).await;

    let (status, body) = post_chat(addr, serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] })).await;
    assert_eq!(status, 500);
    assert_eq!(body, serde_json::json!({ "error": "Missing STUB_API_KEY" }));
    assert_eq!(stub.calls(), 0);
    rag_mock.assert_async().await;
  }

  #[tokio::test]
  async fn unparseable_body_is_treated_as_empty() {
    let stub = Arc::new(StubProvider::replying("ANSWER"));
    let addr = start(stub.clone(), "").await;

    let resp = reqwest::Client::new()
      .post(format!("http://{addr}/api/chat"))
      .body("{ not json")
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], "ANSWER");
    assert_eq!(stub.last_conversation().len(), 1);
  }

  #[tokio::test]
  async fn empty_completion_uses_fallback() {
    let stub = Arc::new(StubProvider::replying("   "));
    let addr = start(stub, "").await;
    let (status, body) = post_chat(addr, serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] })).await;
    assert_eq!(status, 200);
    assert_eq!(body["reply"], FALLBACK_REPLY);
  }

  #[tokio::test]
  async fn screenshot_goes_on_latest_user_turn_only() {
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub.clone(), "").await;

    let turns = serde_json::json!([
      { "role": "user", "content": "one" },
      { "role": "assistant", "content": "two" },
      { "role": "user", "content": "three" },
      { "role": "assistant", "content": "four" }
    ]);
    let (status, _) = post_chat(
      addr,
      serde_json::json!({ "messages": turns, "screenshot": "data:image/png;base64,AAAA" }),
    )
    .await;
    assert_eq!(status, 200);

    let originals: Vec<ChatMessage> = serde_json::from_value(turns).unwrap();
    let sent = stub.last_conversation();
    assert_eq!(sent[1], originals[0]);
    assert_eq!(sent[2], originals[1]);
    assert_eq!(sent[4], originals[3]);
    assert_eq!(
      *sent[3].content(),
      MessageContent::Parts(vec![
        ContentPart::Text("three".to_string()),
        ContentPart::Image("data:image/png;base64,AAAA".to_string()),
      ])
    );
  }

  #[tokio::test]
  async fn caller_turns_reach_provider_unchanged() {
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub.clone(), "").await;

    let turns = serde_json::json!([
      { "role": "user", "content": "a", "name": "bob" },
      { "content": "no role" },
      "stray",
      { "role": "assistant" },
      { "role": "user", "content": "b" }
    ]);
    let (status, _) = post_chat(
      addr,
      serde_json::json!({ "messages": turns, "screenshot": "https://x/shot.png" }),
    )
    .await;
    assert_eq!(status, 200);

    let sent = serde_json::to_value(stub.last_conversation()).unwrap();
    let sent = sent.as_array().unwrap();
    assert_eq!(sent.len(), 6);
    assert_eq!(&sent[1..5], &turns.as_array().unwrap()[..4]);
    assert_eq!(
      sent[5],
      serde_json::json!({
        "role": "user",
        "content": [
          { "type": "text", "text": "b" },
          { "type": "image_url", "image_url": { "url": "https://x/shot.png" } }
        ]
      })
    );
  }

  #[tokio::test]
  async fn text_parts_with_extra_keys_drive_retrieval_and_survive_attachment() {
    let mut rag = mockito::Server::new_async().await;
    let rag_mock = rag
      .mock("POST", "/query")
      .match_body(Matcher::PartialJson(serde_json::json!({ "q": "What sectors are covered?" })))
      .with_status(200)
      .with_body(r#"{"results":[]}"#)
      .create_async()
      .await;
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub.clone(), &format!("{}/query", rag.url())).await;

    let (status, _) = post_chat(
      addr,
      serde_json::json!({
        "messages": [{ "role": "user", "content": [{ "type": "text", "text": "What sectors are covered?", "id": "p1" }] }],
        "screenshot": "data:image/png;base64,AAAA"
      }),
    )
    .await;
    assert_eq!(status, 200);
    rag_mock.assert_async().await;

    let sent = stub.last_conversation();
    assert_eq!(
      *sent[1].content(),
      MessageContent::Parts(vec![
        ContentPart::Text("What sectors are covered?".to_string()),
        ContentPart::Image("data:image/png;base64,AAAA".to_string()),
      ])
    );
  }

  #[tokio::test]
  async fn blank_screenshot_is_not_attached() {
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub.clone(), "").await;

    let (status, _) = post_chat(
      addr,
      serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }], "screenshot": "" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
      serde_json::to_value(&stub.last_conversation()[1]).unwrap(),
      serde_json::json!({ "role": "user", "content": "hi" })
    );
  }

  #[tokio::test]
  async fn oversized_body_gets_json_error() {
    let stub = Arc::new(StubProvider::replying("never"));
    let config = AppConfig {
      rag_url: String::new(),
      max_body_bytes: 1024,
      ..AppConfig::default()
    };
    let addr = start_with(stub.clone(), config).await;

    let resp = reqwest::Client::new()
      .post(format!("http://{addr}/api/chat"))
      .header("content-type", "application/json")
      .body(vec![b' '; 4096])
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), 413);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid request body");
    assert!(body["detail"].is_string());
    assert_eq!(stub.calls(), 0);
  }

  #[tokio::test]
  async fn gemini_end_to_end_merges_guard_into_first_user_turn() {
    let mut rag = mockito::Server::new_async().await;
    let _m = rag_stub(&mut rag, serde_json::json!([{ "text": "Sector list: health, food, education." }])).await;

    let mut gemini = mockito::Server::new_async().await;
    let gemini_mock = gemini
      .mock("POST", "/v1beta/models/gemini-2.0-flash-lite:generateContent")
      .match_body(Matcher::Regex("• Sector list: health, food, education.\\\\n\\\\nWhat sectors".to_string()))
      .with_status(200)
      .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"ANSWER"}]}}]}"#)
      .create_async()
      .await;

    let mut config = AppConfig::default();
    config.provider = ProviderSettings {
      kind: ProviderKind::Gemini,
      model: None,
      base_url: Some(gemini.url()),
      api_key: Some("g-key".to_string()),
      vision: None,
    };
    let provider = providers::from_config(&config, reqwest::Client::new());
    let addr = start(provider, &format!("{}/query", rag.url())).await;

    let (status, body) = post_chat(
      addr,
      serde_json::json!({ "messages": [{ "role": "user", "content": "What sectors are covered?" }] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["reply"], "ANSWER");
    gemini_mock.assert_async().await;
  }

  #[tokio::test]
  async fn diagnostics_report_configuration_without_secrets() {
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub, "http://rag.local/query").await;

    let resp = reqwest::get(format!("http://{addr}/api/chat")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("stub-secret"));
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["hasKey"], true);
    assert_eq!(json["provider"], "stub");
    assert_eq!(json["model"], "stub-model");
    assert_eq!(json["ragUrl"], "http://rag.local/query");
    assert_eq!(json["retrievalEnabled"], true);
  }

  #[tokio::test]
  async fn health_endpoint_returns_json() {
    let stub = Arc::new(StubProvider::replying("ok"));
    let addr = start(stub, "").await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["uptime_ms"].is_number());
  }
}
