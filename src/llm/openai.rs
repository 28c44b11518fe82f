//! OpenAI-compatible chat.completions client (OpenAI itself and Groq).
//!
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{extract_api_error, ChatModel, ProviderKind};
use crate::error::ModelError;

#[derive(Clone)]
pub struct OpenAiCompatible {
  client: reqwest::Client,
  kind: ProviderKind,
  api_key: String,
  base_url: String,
  model: String,
  temperature: f32,
}

impl OpenAiCompatible {
  pub fn new(kind: ProviderKind, api_key: String, base_url: &str, model: &str, temperature: f32, timeout: Duration) -> Self {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self {
      client,
      kind,
      api_key,
      base_url: base_url.trim_end_matches('/').to_string(),
      model: model.to_string(),
      temperature,
    }
  }

  fn transport(&self, e: reqwest::Error) -> ModelError {
    ModelError::Transport { provider: self.kind.to_string(), message: e.to_string() }
  }
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
  fn name(&self) -> &str {
    self.kind.as_str()
  }

  #[instrument(level = "info", skip(self, system, user), fields(provider = %self.kind, model = %self.model))]
  async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature: self.temperature,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "forge-ai/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| self.transport(e))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or(body);
      return Err(ModelError::Status { provider: self.kind.to_string(), status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| self.transport(e))?;
    if let Some(usage) = &body.usage {
      info!(target: "llm", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "LLM usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default().trim().to_string();

    info!(target: "llm", elapsed_ms = start.elapsed().as_millis() as u64, response_len = text.len(), "Model response received");
    if text.is_empty() {
      return Err(ModelError::Empty { provider: self.kind.to_string() });
    }
    Ok(text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}
