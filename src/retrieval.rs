use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;
use crate::models::RetrievedSnippet;

#[derive(Serialize)]
struct RetrievalQuery<'a> {
  q: &'a str,
  k: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  route: Option<&'a str>,
}

#[derive(Deserialize)]
struct RetrievalResponse {
  #[serde(default)]
  results: Vec<RetrievedSnippet>,
}

/// Client for the external retrieval service.
///
/// Any failure degrades to an empty snippet list; the chat request carries on
/// without context.
#[derive(Clone)]
pub struct Retriever {
  http: reqwest::Client,
  url: String,
  top_k: usize,
}

impl Retriever {
  pub fn new(http: reqwest::Client, url: &str, top_k: usize) -> Self {
    Self {
      http,
      url: url.trim().to_string(),
      top_k,
    }
  }

  pub fn enabled(&self) -> bool {
    !self.url.is_empty()
  }

  pub async fn retrieve(&self, query: &str, route: Option<&str>) -> Vec<RetrievedSnippet> {
    if !self.enabled() {
      return Vec::new();
    }
    match self.fetch(query, route).await {
      Ok(snippets) => {
        tracing::debug!(count = snippets.len(), route = route.unwrap_or(""), "retrieved context");
        snippets
      }
      Err(err) => {
        tracing::warn!(error = %err, "retrieval failed, continuing without context");
        Vec::new()
      }
    }
  }

  async fn fetch(&self, query: &str, route: Option<&str>) -> Result<Vec<RetrievedSnippet>, RetrievalError> {
    let payload = RetrievalQuery {
      q: query,
      k: self.top_k,
      route,
    };

    let resp = self.http.post(&self.url).json(&payload).send().await?;
    if !resp.status().is_success() {
      return Err(RetrievalError::Status(resp.status().as_u16()));
    }

    let body = resp.bytes().await?;
    let parsed = serde_json::from_slice::<RetrievalResponse>(&body)
      .map_err(|err| RetrievalError::Malformed(err.to_string()))?;
    Ok(parsed.results)
  }
}
