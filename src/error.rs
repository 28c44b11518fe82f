//! Error types for configuration, model calls, generation, curriculum lookups,
//! delivery and guidance.
//!
//! Sandbox problems are not errors here: they come back as `VerificationResult`s.

use thiserror::Error;

/// Startup configuration could not produce a usable service.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("no LLM credentials configured (set one of GROQ_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY)")]
    NoCredentials,

    #[error("provider '{0}' selected but its API key is not set")]
    ProviderWithoutKey(String),

    #[error("failed to load prompts from {path}: {reason}")]
    Prompts { path: String, reason: String },
}

/// One failed call against one model provider.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} HTTP {status}: {message}")]
    Status { provider: String, status: u16, message: String },

    #[error("{provider} returned an empty completion")]
    Empty { provider: String },
}

/// Failures of one generation request. Everything except `Exhausted` is
/// absorbed by the retry loop.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Primary and fallback providers both failed.
    #[error("model invocation failed on all providers: {0}")]
    Model(String),

    #[error("model output is not valid challenge JSON: {0}")]
    Parse(String),

    #[error("reference solution failed its own tests: {0}")]
    Verification(String),

    #[error("generated code rejected by static analysis: {0}")]
    Security(String),

    #[error("failed to generate a valid level after {attempts} attempts (last error: {last_error})")]
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurriculumError {
    #[error("level number must be positive, got {0}")]
    InvalidLevel(u32),
}

/// Pushing an accepted challenge to the persistence API failed. Not retried.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("persistence API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("persistence API answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// Hint or review request that could not be answered.
#[derive(Debug, Error)]
pub enum GuidanceError {
    #[error("invalid hint_level {0} (expected 1 to 4)")]
    InvalidHintLevel(i64),

    #[error("no model could produce guidance: {0}")]
    Model(String),
}
