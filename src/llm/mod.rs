//! Model provider abstraction.
//!
//! One `ChatModel` implementation per vendor API, picked once at startup by
//! `LlmProviders::from_settings`. Callers only see a primary and a fallback handle.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::config::{LlmSettings, ProviderChoice};
use crate::error::{ConfigurationError, GenerationError, ModelError};

mod anthropic;
mod openai;

pub use anthropic::AnthropicChat;
pub use openai::OpenAiCompatible;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
  Groq,
  OpenAi,
  Anthropic,
}

impl ProviderKind {
  /// Probe order for `LLM_PROVIDER=auto`.
  pub const PRIORITY: [ProviderKind; 3] = [ProviderKind::Groq, ProviderKind::OpenAi, ProviderKind::Anthropic];

  pub fn as_str(&self) -> &'static str {
    match self {
      ProviderKind::Groq => "groq",
      ProviderKind::OpenAi => "openai",
      ProviderKind::Anthropic => "anthropic",
    }
  }
}

impl fmt::Display for ProviderKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProviderKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "groq" => Ok(ProviderKind::Groq),
      "openai" => Ok(ProviderKind::OpenAi),
      "anthropic" => Ok(ProviderKind::Anthropic),
      other => Err(format!("unknown provider '{other}' (expected auto, groq, openai or anthropic)")),
    }
  }
}

/// A model that turns a system + user prompt into raw text.
#[async_trait]
pub trait ChatModel: Send + Sync {
  fn name(&self) -> &str;

  async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError>;
}

pub type ModelHandle = Arc<dyn ChatModel>;

#[derive(Clone)]
pub struct LlmProviders {
  primary: ModelHandle,
  fallback: ModelHandle,
}

impl LlmProviders {
  pub fn new(primary: ModelHandle, fallback: ModelHandle) -> Self {
    Self { primary, fallback }
  }

  /// Resolve primary and fallback from configuration. Fails when no provider has credentials.
  pub fn from_settings(settings: &LlmSettings) -> Result<Self, ConfigurationError> {
    let has_key = |k: ProviderKind| settings.credentials(k).api_key.is_some();
    let available: Vec<ProviderKind> = ProviderKind::PRIORITY.into_iter().filter(|k| has_key(*k)).collect();
    let first = *available.first().ok_or(ConfigurationError::NoCredentials)?;

    let primary_kind = match &settings.provider {
      ProviderChoice::Auto => first,
      ProviderChoice::Fixed(k) if has_key(*k) => *k,
      ProviderChoice::Fixed(k) => return Err(ConfigurationError::ProviderWithoutKey(k.to_string())),
    };
    let fallback_kind = match settings.fallback {
      Some(k) if has_key(k) => k,
      Some(k) => return Err(ConfigurationError::ProviderWithoutKey(k.to_string())),
      None => available.iter().copied().find(|k| *k != primary_kind).unwrap_or(primary_kind),
    };

    let primary = build(settings, primary_kind);
    let fallback = if fallback_kind == primary_kind { primary.clone() } else { build(settings, fallback_kind) };

    info!(target: "llm", primary = %primary_kind, fallback = %fallback_kind, "LLM providers configured");
    Ok(Self { primary, fallback })
  }

  pub fn get_primary(&self) -> ModelHandle {
    self.primary.clone()
  }

  pub fn get_fallback(&self) -> ModelHandle {
    self.fallback.clone()
  }

  /// Ask the primary model, then the fallback with the same prompt if the primary fails.
  #[instrument(level = "info", skip_all, fields(system_len = system.len(), user_len = user.len()))]
  pub async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
    let primary_err = match self.primary.complete(system, user).await {
      Ok(text) => return Ok(text),
      Err(e) => e,
    };
    warn!(target: "llm", model = self.primary.name(), error = %primary_err, "Primary LLM failed; attempting fallback");

    match self.fallback.complete(system, user).await {
      Ok(text) => Ok(text),
      Err(fallback_err) => {
        warn!(target: "llm", model = self.fallback.name(), error = %fallback_err, "Fallback LLM failed");
        Err(GenerationError::Model(format!("primary: {primary_err}; fallback: {fallback_err}")))
      }
    }
  }
}

fn build(settings: &LlmSettings, kind: ProviderKind) -> ModelHandle {
  let creds = settings.credentials(kind);
  let key = creds.api_key.clone().unwrap_or_default();
  match kind {
    ProviderKind::Groq | ProviderKind::OpenAi => Arc::new(OpenAiCompatible::new(
      kind,
      key,
      &creds.base_url,
      &creds.model,
      settings.temperature,
      settings.timeout,
    )),
    ProviderKind::Anthropic => Arc::new(AnthropicChat::new(
      key,
      &creds.base_url,
      &creds.model,
      settings.temperature,
      settings.timeout,
    )),
  }
}

/// Try to extract a clean error message from a vendor error body (`{"error": {"message": ..}}`).
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(serde::Deserialize)]
  struct EWrap { error: EObj }
  #[derive(serde::Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}


#[cfg(test)]
mod tests {
  use super::testing::ScriptedModel;
  use super::*;
  use crate::config::ProviderCredentials;
  use std::time::Duration;

  fn creds(key: Option<&str>) -> ProviderCredentials {
    ProviderCredentials { api_key: key.map(String::from), base_url: "http://localhost".into(), model: "m".into() }
  }

  fn settings(groq: Option<&str>, openai: Option<&str>, anthropic: Option<&str>) -> LlmSettings {
    LlmSettings {
      provider: ProviderChoice::Auto,
      fallback: None,
      groq: creds(groq),
      openai: creds(openai),
      anthropic: creds(anthropic),
      temperature: 0.7,
      timeout: Duration::from_secs(5),
    }
  }

  #[test]
  fn no_credentials_fails_fast() {
    let err = LlmProviders::from_settings(&settings(None, None, None)).err().unwrap();
    assert_eq!(err, ConfigurationError::NoCredentials);
  }

  #[test]
  fn auto_follows_priority_and_picks_a_different_fallback() {
    let p = LlmProviders::from_settings(&settings(None, Some("o"), Some("a"))).unwrap();
    assert_eq!(p.get_primary().name(), "openai");
    assert_eq!(p.get_fallback().name(), "anthropic");
  }

  #[test]
  fn single_provider_falls_back_to_itself() {
    let p = LlmProviders::from_settings(&settings(Some("g"), None, None)).unwrap();
    assert!(Arc::ptr_eq(&p.get_primary(), &p.get_fallback()));
  }

  #[test]
  fn fixed_provider_without_key_is_rejected() {
    let mut s = settings(Some("g"), None, None);
    s.provider = ProviderChoice::Fixed(ProviderKind::Anthropic);
    assert_eq!(
      LlmProviders::from_settings(&s).err().unwrap(),
      ConfigurationError::ProviderWithoutKey("anthropic".into())
    );
  }

  #[test]
  fn provider_names_parse_case_insensitively() {
    assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
    assert!("mistral".parse::<ProviderKind>().is_err());
  }

  #[tokio::test]
  async fn fallback_answers_when_primary_fails() {
    let primary = ScriptedModel::always("p", Err("timeout".into()));
    let fallback = ScriptedModel::always("f", Ok("hello".into()));
    let providers = LlmProviders::new(primary.clone(), fallback.clone());
    assert_eq!(providers.complete("s", "u").await.unwrap(), "hello");
    assert_eq!(primary.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);
  }

  #[tokio::test]
  async fn both_failing_is_a_model_error() {
    let providers = LlmProviders::new(
      ScriptedModel::always("p", Err("401".into())),
      ScriptedModel::always("f", Err("503".into())),
    );
    let err = providers.complete("s", "u").await.unwrap_err();
    assert!(matches!(err, GenerationError::Model(ref m) if m.contains("401") && m.contains("503")));
  }

  #[test]
  fn vendor_error_message_is_extracted() {
    let body = r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#;
    assert_eq!(extract_api_error(body).as_deref(), Some("Invalid API key"));
    assert_eq!(extract_api_error("not json"), None);
  }
}
