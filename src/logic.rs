//! Behaviours behind the HTTP handlers:
//!   - the background generation job (blueprint → orchestrator → persistence API)
//!   - hints and code reviews through the same primary/fallback model path

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::domain::Acceptance;
use crate::error::GuidanceError;
use crate::guidance::{hint_prompt, review_prompt, sanitize_guidance_output, GuidanceMode, HintLevel, Submission};
use crate::protocol::{AnalyzeIn, HintIn};
use crate::state::AppState;

/// How a background job ended. Only used for logging and tests.
#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
  Delivered { slug: String, acceptance: Acceptance },
  DeliveryFailed { slug: String },
  GenerationFailed,
}

/// Generate one level and push it to the persistence API. Never returns an error:
/// every failure ends up in the logs.
#[instrument(level = "info", skip_all, fields(%level_number, user_id = ?user_id))]
pub async fn run_generation_job(state: Arc<AppState>, level_number: u32, user_id: Option<u64>) -> JobOutcome {
  let blueprint = match state.curriculum.get_blueprint(level_number).await {
    Ok(bp) => bp,
    Err(e) => {
      error!(target: "forge_ai", error = %e, "Curriculum lookup failed");
      return JobOutcome::GenerationFailed;
    }
  };

  let outcome = match state.generator.generate_level(&blueprint, user_id).await {
    Ok(o) => o,
    Err(e) => {
      error!(target: "forge_ai", error = %e, "Level generation failed");
      return JobOutcome::GenerationFailed;
    }
  };

  let slug = outcome.challenge.slug.clone();
  match state.core.deliver(&outcome.challenge, level_number, user_id).await {
    Ok(()) => {
      info!(target: "forge_ai", %slug, acceptance = outcome.acceptance.label(), attempts = outcome.attempts, "Generated level delivered");
      JobOutcome::Delivered { slug, acceptance: outcome.acceptance }
    }
    Err(e) => {
      error!(target: "delivery", %slug, error = %e, "delivery failed");
      JobOutcome::DeliveryFailed { slug }
    }
  }
}

#[instrument(level = "info", skip(state, req), fields(hint_level = req.hint_level, code_len = req.user_code.len()))]
pub async fn generate_hint(state: &AppState, req: &HintIn) -> Result<String, GuidanceError> {
  let level = HintLevel::try_from(req.hint_level)?;
  let sub = Submission {
    challenge_title: &req.challenge_title,
    challenge_description: &req.challenge_description,
    user_code: &req.user_code,
  };
  let prompt = hint_prompt(&state.settings.prompts, &sub, level, req.user_xp);
  let raw = state.llm.complete(&prompt.system, &prompt.user).await.map_err(|e| GuidanceError::Model(e.to_string()))?;
  Ok(sanitize_guidance_output(&raw, GuidanceMode::Hint))
}

#[instrument(level = "info", skip(state, req), fields(code_len = req.user_code.len(), has_tests = req.test_code.is_some()))]
pub async fn review_submission(state: &AppState, req: &AnalyzeIn) -> Result<String, GuidanceError> {
  let sub = Submission {
    challenge_title: &req.challenge_title,
    challenge_description: &req.challenge_description,
    user_code: &req.user_code,
  };
  let prompt = review_prompt(&state.settings.prompts, &sub, req.test_code.as_deref());
  let raw = state.llm.complete(&prompt.system, &prompt.user).await.map_err(|e| GuidanceError::Model(e.to_string()))?;
  Ok(sanitize_guidance_output(&raw, GuidanceMode::Analyze))
}
