//! Service settings (environment) and prompt texts (defaults, optional TOML override).
//!
//! `Settings` is built once in `main` and handed to every component; nothing reads
//! the environment after startup. See `Prompts` for the TOML schema.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::error::ConfigurationError;
use crate::llm::ProviderKind;

#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub core_service_url: String,
  pub core_challenge_path: String,
  pub internal_api_key: String,
  /// Empty means any origin.
  pub cors_origins: Vec<String>,
  pub llm: LlmSettings,
  pub sandbox: SandboxSettings,
  pub security: SecuritySettings,
  pub generation: GenerationSettings,
  pub prompts: Prompts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderChoice {
  /// Probe credentials in `ProviderKind::PRIORITY` order.
  Auto,
  Fixed(ProviderKind),
}

#[derive(Clone, Debug)]
pub struct ProviderCredentials {
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
}

#[derive(Clone, Debug)]
pub struct LlmSettings {
  pub provider: ProviderChoice,
  pub fallback: Option<ProviderKind>,
  pub groq: ProviderCredentials,
  pub openai: ProviderCredentials,
  pub anthropic: ProviderCredentials,
  pub temperature: f32,
  pub timeout: Duration,
}

impl LlmSettings {
  pub fn credentials(&self, kind: ProviderKind) -> &ProviderCredentials {
    match kind {
      ProviderKind::Groq => &self.groq,
      ProviderKind::OpenAi => &self.openai,
      ProviderKind::Anthropic => &self.anthropic,
    }
  }
}

#[derive(Clone, Debug)]
pub struct PistonSettings {
  pub url: String,
  pub language: String,
  pub version: String,
  pub compile_timeout: Duration,
  pub run_timeout: Duration,
  pub memory_limit_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct LocalSettings {
  pub python: String,
  pub timeout: Duration,
  /// Where scratch files go; system temp dir when `None`.
  pub work_dir: Option<PathBuf>,
  /// RLIMIT_NPROC applied to the interpreter (unix only).
  pub max_processes: u64,
  /// Bytes kept per output stream; the rest is read and discarded.
  pub output_limit_bytes: u64,
}

pub const DEFAULT_MAX_PROCESSES: u64 = 64;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: u64 = 64 * 1024;

#[derive(Clone, Debug)]
pub enum SandboxSettings {
  Piston(PistonSettings),
  Local(LocalSettings),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecuritySettings {
  pub blocked_modules: Vec<String>,
  pub blocked_builtins: Vec<String>,
}

pub const DEFAULT_BLOCKED_MODULES: &[&str] = &[
  "os", "sys", "subprocess", "shutil", "importlib", "socket", "requests", "urllib", "http", "ftplib",
];
pub const DEFAULT_BLOCKED_BUILTINS: &[&str] = &["exec", "eval", "compile", "open", "input"];

impl Default for SecuritySettings {
  fn default() -> Self {
    Self {
      blocked_modules: DEFAULT_BLOCKED_MODULES.iter().map(|s| s.to_string()).collect(),
      blocked_builtins: DEFAULT_BLOCKED_BUILTINS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationSettings {
  pub max_retries: u32,
  pub default_xp: u32,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self { max_retries: 3, default_xp: 50 }
  }
}

impl Settings {
  pub fn from_env() -> Result<Self, ConfigurationError> {
    Self::from_lookup(|k| std::env::var(k).ok())
  }

  /// Build settings from any key→value source. Blank values count as unset.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let core_service_url = get("CORE_SERVICE_URL")
      .ok_or(ConfigurationError::Missing("CORE_SERVICE_URL"))?
      .trim_end_matches('/')
      .to_string();
    let internal_api_key = get("INTERNAL_API_KEY").ok_or(ConfigurationError::Missing("INTERNAL_API_KEY"))?;

    let cors_origins = get("CORS_ORIGINS")
      .map(|v| split_list(&v))
      .unwrap_or_default()
      .into_iter()
      .filter(|o| o != "*")
      .collect();

    let provider = match get("LLM_PROVIDER").as_deref() {
      None | Some("auto") => ProviderChoice::Auto,
      Some(name) => ProviderChoice::Fixed(parse_provider("LLM_PROVIDER", name)?),
    };
    let fallback = get("LLM_FALLBACK_PROVIDER")
      .map(|name| parse_provider("LLM_FALLBACK_PROVIDER", &name))
      .transpose()?;

    let llm = LlmSettings {
      provider,
      fallback,
      groq: ProviderCredentials {
        api_key: get("GROQ_API_KEY"),
        base_url: get("GROQ_BASE_URL").unwrap_or_else(|| "https://api.groq.com/openai/v1".into()),
        model: get("GROQ_MODEL").unwrap_or_else(|| "llama-3.3-70b-versatile".into()),
      },
      openai: ProviderCredentials {
        api_key: get("OPENAI_API_KEY"),
        base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
        model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
      },
      anthropic: ProviderCredentials {
        api_key: get("ANTHROPIC_API_KEY"),
        base_url: get("ANTHROPIC_BASE_URL").unwrap_or_else(|| "https://api.anthropic.com".into()),
        model: get("ANTHROPIC_MODEL").unwrap_or_else(|| "claude-3-5-haiku-20241022".into()),
      },
      temperature: parse_or(&get, "LLM_TEMPERATURE", 0.7)?,
      timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 60)?),
    };

    let run_timeout = Duration::from_millis(parse_or(&get, "SANDBOX_RUN_TIMEOUT_MS", 5_000)?);
    let sandbox = match get("SANDBOX_BACKEND").as_deref() {
      None | Some("piston") => SandboxSettings::Piston(PistonSettings {
        url: get("PISTON_URL").unwrap_or_else(|| "http://piston:2000".into()).trim_end_matches('/').to_string(),
        language: get("PISTON_LANGUAGE").unwrap_or_else(|| "python".into()),
        version: get("PISTON_VERSION").unwrap_or_else(|| "3.10.0".into()),
        compile_timeout: Duration::from_millis(parse_or(&get, "SANDBOX_COMPILE_TIMEOUT_MS", 10_000)?),
        run_timeout,
        memory_limit_bytes: parse_or(&get, "SANDBOX_MEMORY_LIMIT_BYTES", 128 * 1024 * 1024)?,
      }),
      Some("local") => SandboxSettings::Local(LocalSettings {
        python: get("SANDBOX_PYTHON").unwrap_or_else(|| "python3".into()),
        timeout: run_timeout,
        work_dir: get("SANDBOX_WORK_DIR").map(PathBuf::from),
        max_processes: parse_or(&get, "SANDBOX_MAX_PROCESSES", DEFAULT_MAX_PROCESSES)?,
        output_limit_bytes: parse_or(&get, "SANDBOX_OUTPUT_LIMIT_BYTES", DEFAULT_OUTPUT_LIMIT_BYTES)?,
      }),
      Some(other) => {
        return Err(ConfigurationError::Invalid {
          key: "SANDBOX_BACKEND",
          reason: format!("unknown backend '{other}' (expected 'piston' or 'local')"),
        })
      }
    };

    let mut security = SecuritySettings::default();
    if let Some(v) = get("SECURITY_BLOCKED_MODULES") {
      security.blocked_modules = split_list(&v);
    }
    if let Some(v) = get("SECURITY_BLOCKED_BUILTINS") {
      security.blocked_builtins = split_list(&v);
    }

    let defaults = GenerationSettings::default();
    let generation = GenerationSettings {
      max_retries: parse_or(&get, "GENERATION_MAX_RETRIES", defaults.max_retries)?,
      default_xp: parse_or(&get, "GENERATION_DEFAULT_XP", defaults.default_xp)?,
    };
    if generation.default_xp == 0 {
      return Err(ConfigurationError::Invalid { key: "GENERATION_DEFAULT_XP", reason: "must be positive".into() });
    }

    let prompts = match get("PROMPTS_CONFIG_PATH") {
      Some(path) => load_prompts(&path)?,
      None => Prompts::default(),
    };

    Ok(Self {
      port: parse_or(&get, "PORT", 8001)?,
      core_service_url,
      core_challenge_path: get("CORE_CHALLENGE_PATH").unwrap_or_else(|| "/api/challenges/internal-create/".into()),
      internal_api_key,
      cors_origins,
      llm,
      sandbox,
      security,
      generation,
      prompts,
    })
  }
}

fn parse_provider(key: &'static str, name: &str) -> Result<ProviderKind, ConfigurationError> {
  ProviderKind::from_str(name).map_err(|reason| ConfigurationError::Invalid { key, reason })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigurationError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
  G: Fn(&str) -> Option<String>,
{
  match get(key) {
    Some(raw) => raw
      .parse::<T>()
      .map_err(|e| ConfigurationError::Invalid { key, reason: format!("'{raw}': {e}") }),
    None => Ok(default),
  }
}

fn split_list(raw: &str) -> Vec<String> {
  raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Prompt texts. Placeholders in `{braces}` are filled by `util::fill_template`.
/// Any subset of fields can be overridden from TOML; the rest keep their defaults.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Prompts {
  // Challenge generation ({topic}, {concepts}, {difficulty}, {level})
  pub generation_system: String,
  pub generation_user_template: String,
  // Hints ({challenge_title}, {challenge_description}, {user_code}, {user_xp}, {hint_level})
  pub hint_system: String,
  pub hint_user_template: String,
  // Code review ({challenge_title}, {challenge_description}, {user_code}, {test_code})
  pub review_system: String,
  pub review_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generation_system: DEFAULT_GENERATION_SYSTEM.into(),
      generation_user_template: "Generate challenge for Level {level} using the blueprint.".into(),
      hint_system: DEFAULT_HINT_SYSTEM.into(),
      hint_user_template: DEFAULT_HINT_USER.into(),
      review_system: DEFAULT_REVIEW_SYSTEM.into(),
      review_user_template: DEFAULT_REVIEW_USER.into(),
    }
  }
}

const DEFAULT_GENERATION_SYSTEM: &str = r#"You are an expert Coding Mentor for absolute beginners.
Your task is to generate a fun, encouraging, and clear Python coding challenge.

CRITICAL REQUIREMENTS:
1. FOCUS: {topic}
2. CONCEPTS: {concepts}
3. DIFFICULTY: {difficulty}
4. FORMAT: You MUST output ONLY valid JSON. No conversational text.
5. SCHEMA:
{
  "title": "Concise Technical Title",
  "slug": "lvl-{level}-short-name",
  "description": "Clear and direct instructions. What needs to be done.",
  "initial_code": "The starting code provided to the user. Use newlines.",
  "test_code": "Assertions wrapped in check(scope). Use newlines, NO semicolons.",
  "reference_solution": "Simple solution. Use newlines.",
  "xp_reward": 50
}

RULES:
- Level 1 MUST be a simple print task or basic calculation.
- Use clear, direct English.
- NEVER use semicolons to separate statements in any code field.
- ALWAYS use actual newlines (`\n` in JSON) for multiple statements.
- Do not import modules; the checker rejects os, sys, subprocess and similar imports.

TESTING INSTRUCTION (CRITICAL):
- The `test_code` MUST define exactly one function named `check(scope)`.
- `scope` is a dictionary of the user's top-level variables and functions.
- DO NOT write asserts at the top level. Wrap them in `check(scope)`.
- Correct:
  def check(scope):
      assert 'total' in scope
      assert scope['total'] == 10
"#;

const DEFAULT_HINT_SYSTEM: &str = r#"You are an expert coding tutor. Provide strictly technical and concise hints. DO NOT use introductory phrases, pleasantries, or follow-up questions. Identify the specific logic error or syntax issue and explain it directly. Never write code.

Hint strictness levels:
- Level 1 (Gentle): A nudge. A question to make them think.
- Level 2 (Moderate): A more direct clue. "Think about..."
- Level 3 (Significant): Explain the concept needed.
- Level 4 (Strong): A near-direct solution outline in words.
"#;

const DEFAULT_HINT_USER: &str = r#"Challenge: {challenge_title}
Description: {challenge_description}
User's Code:
{user_code}
User's XP: {user_xp}
Hint Level: {hint_level}

Provide a hint at level {hint_level}."#;

const DEFAULT_REVIEW_SYSTEM: &str = "You are a strict Python code reviewer for beginners. Start with 'Findings:' and list correctness problems first, then readability. Describe fixes in words only; never write code or the full solution.";

const DEFAULT_REVIEW_USER: &str = r#"Challenge: {challenge_title}
Description: {challenge_description}
Tests:
{test_code}
User's Code:
{user_code}"#;

/// Load prompt overrides from a TOML file.
pub fn load_prompts(path: &str) -> Result<Prompts, ConfigurationError> {
  let raw = std::fs::read_to_string(path).map_err(|e| {
    error!(target: "forge_ai", %path, error = %e, "Failed to read prompts TOML");
    ConfigurationError::Prompts { path: path.into(), reason: e.to_string() }
  })?;
  let prompts = toml::from_str::<Prompts>(&raw).map_err(|e| {
    error!(target: "forge_ai", %path, error = %e, "Failed to parse prompts TOML");
    ConfigurationError::Prompts { path: path.into(), reason: e.to_string() }
  })?;
  info!(target: "forge_ai", %path, "Loaded prompt overrides (TOML)");
  Ok(prompts)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::io::Write;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |k| map.get(k).cloned()
  }

  const BASE: &[(&str, &str)] = &[("CORE_SERVICE_URL", "http://core:8000/"), ("INTERNAL_API_KEY", "secret")];

  #[test]
  fn defaults_apply_when_only_required_keys_are_set() {
    let s = Settings::from_lookup(lookup(BASE)).unwrap();
    assert_eq!(s.port, 8001);
    assert_eq!(s.core_service_url, "http://core:8000");
    assert_eq!(s.generation, GenerationSettings { max_retries: 3, default_xp: 50 });
    assert_eq!(s.security, SecuritySettings::default());
    assert_eq!(s.llm.provider, ProviderChoice::Auto);
    assert!(s.cors_origins.is_empty());
    match s.sandbox {
      SandboxSettings::Piston(p) => {
        assert_eq!(p.run_timeout, Duration::from_secs(5));
        assert_eq!(p.compile_timeout, Duration::from_secs(10));
        assert_eq!(p.memory_limit_bytes, 128 * 1024 * 1024);
      }
      SandboxSettings::Local(_) => panic!("piston is the default backend"),
    }
  }

  #[test]
  fn missing_internal_key_is_a_configuration_error() {
    let err = Settings::from_lookup(lookup(&[("CORE_SERVICE_URL", "http://core")])).unwrap_err();
    assert_eq!(err, ConfigurationError::Missing("INTERNAL_API_KEY"));
  }

  #[test]
  fn unknown_backend_and_bad_numbers_are_rejected() {
    let mut pairs = BASE.to_vec();
    pairs.push(("SANDBOX_BACKEND", "docker"));
    assert!(matches!(
      Settings::from_lookup(lookup(&pairs)),
      Err(ConfigurationError::Invalid { key: "SANDBOX_BACKEND", .. })
    ));

    let mut pairs = BASE.to_vec();
    pairs.push(("GENERATION_MAX_RETRIES", "many"));
    assert!(matches!(
      Settings::from_lookup(lookup(&pairs)),
      Err(ConfigurationError::Invalid { key: "GENERATION_MAX_RETRIES", .. })
    ));
  }

  #[test]
  fn deny_lists_and_local_backend_are_overridable() {
    let mut pairs = BASE.to_vec();
    pairs.extend([
      ("SECURITY_BLOCKED_MODULES", "os, pickle"),
      ("SANDBOX_BACKEND", "local"),
      ("SANDBOX_RUN_TIMEOUT_MS", "1500"),
      ("SANDBOX_OUTPUT_LIMIT_BYTES", "4096"),
      ("LLM_PROVIDER", "openai"),
      ("CORS_ORIGINS", "http://a.test, http://b.test"),
    ]);
    let s = Settings::from_lookup(lookup(&pairs)).unwrap();
    assert_eq!(s.security.blocked_modules, vec!["os", "pickle"]);
    assert_eq!(s.security.blocked_builtins.len(), DEFAULT_BLOCKED_BUILTINS.len());
    assert_eq!(s.llm.provider, ProviderChoice::Fixed(ProviderKind::OpenAi));
    assert_eq!(s.cors_origins, vec!["http://a.test", "http://b.test"]);
    match s.sandbox {
      SandboxSettings::Local(l) => {
        assert_eq!(l.timeout, Duration::from_millis(1500));
        assert_eq!(l.python, "python3");
        assert_eq!(l.output_limit_bytes, 4096);
        assert_eq!(l.max_processes, DEFAULT_MAX_PROCESSES);
      }
      SandboxSettings::Piston(_) => panic!("expected local backend"),
    }
  }

  #[test]
  fn prompts_toml_overrides_only_given_fields() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "hint_system = \"Be brief.\"").unwrap();
    let p = load_prompts(f.path().to_str().unwrap()).unwrap();
    assert_eq!(p.hint_system, "Be brief.");
    assert_eq!(p.generation_system, Prompts::default().generation_system);
  }

  #[test]
  fn unreadable_prompts_file_fails_fast() {
    let err = load_prompts("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ConfigurationError::Prompts { .. }));
  }
}
