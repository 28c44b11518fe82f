//! Domain models used by the service: blueprints, generated challenges and sandbox verdicts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Target difficulty of a curriculum level.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
  Beginner,
  Intermediate,
  Advanced,
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Difficulty::Beginner => "beginner",
      Difficulty::Intermediate => "intermediate",
      Difficulty::Advanced => "advanced",
    };
    f.write_str(s)
  }
}

/// Curriculum-supplied description of one level. Immutable once produced.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeBlueprint {
  pub level_number: u32,
  pub topic: String,
  pub concepts: Vec<String>,
  pub difficulty: Difficulty,
}

/// Normalized artifact of one accepted generation attempt.
///
/// Only built by `ChallengeDraft::normalize`, so the slug namespace is applied exactly once.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedChallenge {
  pub title: String,
  pub slug: String,
  pub description: String,
  pub initial_code: String,
  pub test_code: String,
  pub reference_solution: String,
  pub xp_reward: u32,
}

/// Why a sandbox run did not pass. `Display` renders the strings callers match on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SandboxFailure {
  /// Execution backend unreachable or missing its runtime.
  #[error("Sandbox not ready")]
  NotReady,
  /// Backend answered, but not with a usable run (e.g. `Piston Error 503`).
  #[error("{backend} Error {detail}")]
  Backend { backend: String, detail: String },
  #[error("Tests Failed")]
  TestsFailed,
  #[error("Timeout ({}s limit)", .limit.as_secs_f64())]
  Timeout { limit: Duration },
  /// Static analysis refused the source before execution.
  #[error("{0}")]
  Rejected(String),
  #[error("{0}")]
  Transport(String),
}

impl SandboxFailure {
  /// True when the verification dependency itself is down, not the code under test.
  pub fn is_infrastructure(&self) -> bool {
    matches!(self, SandboxFailure::NotReady | SandboxFailure::Backend { .. })
  }
}

impl Serialize for SandboxFailure {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// Output of one sandbox run. Never persisted.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct VerificationResult {
  pub passed: bool,
  pub output: String,
  pub error: Option<SandboxFailure>,
}

impl VerificationResult {
  pub fn passed(output: impl Into<String>) -> Self {
    Self { passed: true, output: output.into(), error: None }
  }

  pub fn failed(output: impl Into<String>, failure: SandboxFailure) -> Self {
    Self { passed: false, output: output.into(), error: Some(failure) }
  }

  pub fn is_infrastructure_failure(&self) -> bool {
    !self.passed && self.error.as_ref().map_or(false, SandboxFailure::is_infrastructure)
  }

  pub fn error_message(&self) -> Option<String> {
    self.error.as_ref().map(|e| e.to_string())
  }
}

/// Per-request orchestration state. Discarded once the request ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationAttempt {
  pub level_number: u32,
  pub retry_count: u32,
  pub user_id: Option<u64>,
}

impl GenerationAttempt {
  pub fn new(level_number: u32, user_id: Option<u64>) -> Self {
    Self { level_number, retry_count: 0, user_id }
  }
}

/// How an accepted challenge got through verification.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "acceptance", rename_all = "snake_case")]
pub enum Acceptance {
  Verified,
  /// Accepted without a successful run because the sandbox was unavailable.
  Bypassed { reason: String },
}

impl Acceptance {
  pub fn label(&self) -> &'static str {
    match self {
      Acceptance::Verified => "verified",
      Acceptance::Bypassed { .. } => "bypassed",
    }
  }
}

#[derive(Clone, Debug)]
pub struct GenerationOutcome {
  pub challenge: GeneratedChallenge,
  pub acceptance: Acceptance,
  /// Total model attempts spent, including the accepted one.
  pub attempts: u32,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn failure_strings_match_caller_contract() {
    assert_eq!(SandboxFailure::NotReady.to_string(), "Sandbox not ready");
    assert_eq!(SandboxFailure::TestsFailed.to_string(), "Tests Failed");
    assert_eq!(
      SandboxFailure::Timeout { limit: Duration::from_secs(5) }.to_string(),
      "Timeout (5s limit)"
    );
    assert_eq!(
      SandboxFailure::Backend { backend: "Piston".into(), detail: "503".into() }.to_string(),
      "Piston Error 503"
    );
  }

  #[test]
  fn only_environment_problems_count_as_infrastructure() {
    assert!(VerificationResult::failed("", SandboxFailure::NotReady).is_infrastructure_failure());
    assert!(!VerificationResult::failed("", SandboxFailure::TestsFailed).is_infrastructure_failure());
    assert!(!VerificationResult::failed("", SandboxFailure::Rejected("x".into())).is_infrastructure_failure());
    assert!(!VerificationResult::passed("ok").is_infrastructure_failure());
  }

  #[test]
  fn verification_result_serializes_error_as_string() {
    let v = serde_json::to_value(VerificationResult::failed("boom", SandboxFailure::TestsFailed)).unwrap();
    assert_eq!(v["passed"], false);
    assert_eq!(v["error"], "Tests Failed");
    let ok = serde_json::to_value(VerificationResult::passed("")).unwrap();
    assert!(ok["error"].is_null());
  }

  #[test]
  fn difficulty_round_trips_lowercase() {
    let d: Difficulty = serde_json::from_str("\"intermediate\"").unwrap();
    assert_eq!(d, Difficulty::Intermediate);
    assert_eq!(Difficulty::Advanced.to_string(), "advanced");
  }
}
