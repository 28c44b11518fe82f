//! Hints and code reviews for a learner's submission.
//!
//! Model output is scrubbed by `sanitize_guidance_output` before it reaches the
//! learner, so guidance never carries solution code.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::Prompts;
use crate::error::GuidanceError;
use crate::util::fill_template;

pub const HINT_FALLBACK: &str = "Focus on the core logic the task asks for and re-read the description carefully.";
pub const ANALYZE_FALLBACK: &str =
  "Findings: the review could not be rendered without code. Improve correctness first, then readability.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuidanceMode {
  Hint,
  Analyze,
}

impl GuidanceMode {
  pub fn fallback(&self) -> &'static str {
    match self {
      GuidanceMode::Hint => HINT_FALLBACK,
      GuidanceMode::Analyze => ANALYZE_FALLBACK,
    }
  }
}

/// Strictness of a hint, 1 (gentle nudge) to 4 (near-direct outline).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HintLevel(u8);

impl HintLevel {
  pub fn get(&self) -> u8 {
    self.0
  }
}

impl TryFrom<i64> for HintLevel {
  type Error = GuidanceError;

  fn try_from(v: i64) -> Result<Self, Self::Error> {
    match v {
      1..=4 => Ok(HintLevel(v as u8)),
      _ => Err(GuidanceError::InvalidHintLevel(v)),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuidancePrompt {
  pub system: String,
  pub user: String,
}

pub struct Submission<'a> {
  pub challenge_title: &'a str,
  pub challenge_description: &'a str,
  pub user_code: &'a str,
}

pub fn hint_prompt(prompts: &Prompts, sub: &Submission<'_>, level: HintLevel, user_xp: u32) -> GuidancePrompt {
  let level = level.get().to_string();
  let xp = user_xp.to_string();
  GuidancePrompt {
    system: prompts.hint_system.clone(),
    user: fill_template(
      &prompts.hint_user_template,
      &[
        ("challenge_title", sub.challenge_title),
        ("challenge_description", sub.challenge_description),
        ("user_code", sub.user_code),
        ("user_xp", xp.as_str()),
        ("hint_level", level.as_str()),
      ],
    ),
  }
}

pub fn review_prompt(prompts: &Prompts, sub: &Submission<'_>, test_code: Option<&str>) -> GuidancePrompt {
  GuidancePrompt {
    system: prompts.review_system.clone(),
    user: fill_template(
      &prompts.review_user_template,
      &[
        ("challenge_title", sub.challenge_title),
        ("challenge_description", sub.challenge_description),
        ("user_code", sub.user_code),
        ("test_code", test_code.unwrap_or("(not provided)")),
      ],
    ),
  }
}

fn fence_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)```.*?(```|\z)").expect("static regex"))
}

fn code_line_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(concat!(
      r"^(?:",
      r"(?:def|class)\s+\w+",
      r"|return\b",
      r"|import\s+\w",
      r"|from\s+\S+\s+import\b",
      r"|(?:for|while|if|elif|with)\b.*:\s*$",
      r"|(?:else|try|finally)\s*:",
      r"|except\b.*:\s*$",
      r"|print\(",
      r"|[A-Za-z_]\w*(?:\[[^\]]*\]|\.\w+)*\s*[-+*/%]?=[^=]",
      r")"
    ))
    .expect("static regex")
  })
}

fn looks_like_code(line: &str) -> bool {
  if line.starts_with("    ") || line.starts_with('\t') {
    return !line.trim().is_empty();
  }
  code_line_re().is_match(line.trim())
}

/// Remove fenced blocks and code-looking lines; fall back to a fixed text when
/// nothing readable is left.
pub fn sanitize_guidance_output(text: &str, mode: GuidanceMode) -> String {
  let without_fences = fence_re().replace_all(text, "");

  let mut lines: Vec<&str> = Vec::new();
  for line in without_fences.lines() {
    if looks_like_code(line) {
      continue;
    }
    let blank = line.trim().is_empty();
    if blank && lines.last().map_or(true, |l| l.trim().is_empty()) {
      continue;
    }
    lines.push(line.trim_end());
  }

  let out = lines.join("\n").trim().to_string();
  if out.is_empty() {
    mode.fallback().to_string()
  } else {
    out
  }
}
