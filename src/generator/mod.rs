//! Challenge generation orchestrator.
//!
//! One request walks `Drafting → Parsing → Verifying`, then ends `Accepted`,
//! loops through `Retrying` back to `Drafting`, or stops `Exhausted` once the
//! retry ceiling is spent. Attempts are sequential; requests share nothing but
//! the model and sandbox handles, which are safe to use concurrently.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{GenerationSettings, Prompts};
use crate::domain::{
  Acceptance, ChallengeBlueprint, GeneratedChallenge, GenerationAttempt, GenerationOutcome, SandboxFailure,
};
use crate::error::GenerationError;
use crate::llm::LlmProviders;
use crate::sandbox::Verifier;

pub mod parse;
pub mod prompt;

use parse::parse_model_output;
use prompt::{drafting_prompt, DraftPrompt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
  Drafting,
  Parsing,
  Verifying,
  Accepted,
  Retrying,
  Exhausted,
}

impl Stage {
  fn as_str(&self) -> &'static str {
    match self {
      Stage::Drafting => "drafting",
      Stage::Parsing => "parsing",
      Stage::Verifying => "verifying",
      Stage::Accepted => "accepted",
      Stage::Retrying => "retrying",
      Stage::Exhausted => "exhausted",
    }
  }
}

#[derive(Clone)]
pub struct ChallengeGenerator {
  llm: LlmProviders,
  verifier: Arc<dyn Verifier>,
  prompts: Prompts,
  settings: GenerationSettings,
}

impl ChallengeGenerator {
  pub fn new(llm: LlmProviders, verifier: Arc<dyn Verifier>, prompts: Prompts, settings: GenerationSettings) -> Self {
    Self { llm, verifier, prompts, settings }
  }

  /// Produce one accepted challenge for `blueprint`, or `Exhausted` after
  /// `max_retries + 1` failed attempts.
  #[instrument(level = "info", skip_all, fields(level = blueprint.level_number, topic = %blueprint.topic, user_id = ?user_id))]
  pub async fn generate_level(
    &self,
    blueprint: &ChallengeBlueprint,
    user_id: Option<u64>,
  ) -> Result<GenerationOutcome, GenerationError> {
    let prompt = drafting_prompt(&self.prompts, blueprint);
    let mut attempt = GenerationAttempt::new(blueprint.level_number, user_id);

    loop {
      match self.attempt_once(&prompt, &attempt).await {
        Ok((challenge, acceptance)) => {
          let attempts = attempt.retry_count + 1;
          match &acceptance {
            Acceptance::Verified => info!(
              target: "generator", stage = Stage::Accepted.as_str(), acceptance = acceptance.label(),
              slug = %challenge.slug, attempts, "Challenge accepted"
            ),
            Acceptance::Bypassed { reason } => warn!(
              target: "generator", stage = Stage::Accepted.as_str(), acceptance = acceptance.label(),
              %reason, slug = %challenge.slug, attempts, "Sandbox unavailable; accepting challenge without verification"
            ),
          }
          return Ok(GenerationOutcome { challenge, acceptance, attempts });
        }
        Err(e) if attempt.retry_count < self.settings.max_retries => {
          warn!(target: "generator", stage = Stage::Retrying.as_str(), retry = attempt.retry_count + 1, error = %e, "Attempt failed; retrying");
          attempt.retry_count += 1;
        }
        Err(e) => {
          let attempts = attempt.retry_count + 1;
          error!(target: "generator", stage = Stage::Exhausted.as_str(), attempts, error = %e, "Retry budget exhausted");
          return Err(GenerationError::Exhausted { attempts, last_error: e.to_string() });
        }
      }
    }
  }

  async fn attempt_once(
    &self,
    prompt: &DraftPrompt,
    attempt: &GenerationAttempt,
  ) -> Result<(GeneratedChallenge, Acceptance), GenerationError> {
    debug!(target: "generator", stage = Stage::Drafting.as_str(), retry = attempt.retry_count, "Requesting draft");
    let raw = self.llm.complete(&prompt.system, &prompt.user).await?;

    debug!(target: "generator", stage = Stage::Parsing.as_str(), raw_len = raw.len(), "Parsing draft");
    let challenge = parse_model_output(&raw)?.normalize(attempt, self.settings.default_xp);

    debug!(target: "generator", stage = Stage::Verifying.as_str(), slug = %challenge.slug, "Verifying reference solution");
    let result = self.verifier.verify(&challenge.reference_solution, &challenge.test_code).await;

    if result.passed {
      return Ok((challenge, Acceptance::Verified));
    }
    if result.is_infrastructure_failure() {
      let reason = result.error_message().unwrap_or_default();
      return Ok((challenge, Acceptance::Bypassed { reason }));
    }
    match result.error {
      Some(SandboxFailure::Rejected(msg)) => Err(GenerationError::Security(msg)),
      Some(other) => Err(GenerationError::Verification(other.to_string())),
      None => Err(GenerationError::Verification("failed without a reported reason".into())),
    }
  }
}
