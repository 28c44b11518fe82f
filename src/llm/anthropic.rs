//! Anthropic Messages API client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{extract_api_error, ChatModel};
use crate::error::ModelError;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicChat {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
  temperature: f32,
}

impl AnthropicChat {
  pub fn new(api_key: String, base_url: &str, model: &str, temperature: f32, timeout: Duration) -> Self {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self {
      client,
      api_key,
      base_url: base_url.trim_end_matches('/').to_string(),
      model: model.to_string(),
      temperature,
    }
  }
}

#[async_trait]
impl ChatModel for AnthropicChat {
  fn name(&self) -> &str {
    PROVIDER
  }

  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
    let req = MessagesRequest {
      model: &self.model,
      max_tokens: MAX_TOKENS,
      system,
      messages: vec![Message { role: "user", content: user }],
      temperature: self.temperature,
    };

    let start = Instant::now();
    let transport = |e: reqwest::Error| ModelError::Transport { provider: PROVIDER.into(), message: e.to_string() };
    let res = self.client.post(format!("{}/v1/messages", self.base_url))
      .header(USER_AGENT, "forge-ai/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-api-key", &self.api_key)
      .header("anthropic-version", API_VERSION)
      .json(&req).send().await.map_err(transport)?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or(body);
      return Err(ModelError::Status { provider: PROVIDER.into(), status: status.as_u16(), message });
    }

    let body: MessagesResponse = res.json().await.map_err(transport)?;
    let text: String = body.content.into_iter()
      .filter(|block| block.kind == "text")
      .filter_map(|block| block.text)
      .collect::<Vec<_>>()
      .join("");
    let text = text.trim().to_string();

    info!(target: "llm", elapsed_ms = start.elapsed().as_millis() as u64, response_len = text.len(), "Model response received");
    if text.is_empty() {
      return Err(ModelError::Empty { provider: PROVIDER.into() });
    }
    Ok(text)
  }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  system: &'a str,
  messages: Vec<Message<'a>>,
  temperature: f32,
}
#[derive(Serialize)]
struct Message<'a> { role: &'a str, content: &'a str }

#[derive(Deserialize)]
struct MessagesResponse { content: Vec<ContentBlock> }
#[derive(Deserialize)]
struct ContentBlock {
  #[serde(rename = "type")] kind: String,
  #[serde(default)] text: Option<String>,
}
