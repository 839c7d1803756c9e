mod chat;
mod config;
mod error;
mod logger;
mod models;
mod normalize;
mod prompt;
mod providers;
mod retrieval;
mod router;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use chat::ChatPipeline;
use providers::GenerationParams;
use retrieval::Retriever;
use router::{run_router, RouterState};

#[derive(Parser, Debug)]
#[command(name = "datalib-chat", version, about = "Guarded chat endpoint for the Data Library site")]
struct Cli {
  /// Address to listen on.
  #[arg(long, env = "CHAT_LISTEN", default_value = "127.0.0.1:3000")]
  listen: String,

  /// Optional JSON config file; environment variables are applied on top.
  #[arg(long, env = "CHAT_CONFIG")]
  config: Option<PathBuf>,

  #[arg(long, env = "CHAT_LOG_LEVEL", default_value = "info")]
  log_level: String,

  #[arg(long, env = "CHAT_JSON_LOGS")]
  json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let cli = Cli::parse();
  logger::init(&cli.log_level, cli.json_logs);

  let config = config::load(cli.config.as_deref()).context("failed to load configuration")?;
  let http = reqwest::Client::new();
  let provider = providers::from_config(&config, http.clone());

  if let Err(err) = provider.check_configured() {
    tracing::warn!("{err}; chat requests will fail until it is set");
  }
  if !config.retrieval_enabled() {
    tracing::warn!("RAG_URL is empty, answering without retrieved context");
  }

  let pipeline = ChatPipeline {
    retriever: Retriever::new(http, &config.rag_url, config.rag_top_k),
    provider,
    scope: config.assistant_scope.clone(),
    params: GenerationParams::from_config(&config),
  };

  let listener = std::net::TcpListener::bind(&cli.listen).with_context(|| format!("failed to bind {}", cli.listen))?;
  tracing::info!(
    addr = %listener.local_addr()?,
    provider = pipeline.provider.name(),
    model = pipeline.provider.model(),
    "chat router listening"
  );

  let state = RouterState {
    started_at: Instant::now(),
    started_at_utc: chrono::Utc::now(),
    config,
    pipeline,
  };

  tokio::select! {
    res = run_router(listener, state) => res?,
    _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
  }
  Ok(())
}
