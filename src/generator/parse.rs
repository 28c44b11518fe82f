//! Model output → `ChallengeDraft` → `GeneratedChallenge`.
//!
//! Parsing is two-stage: a strict JSON parse of the extracted object, then one
//! retry after sanitizing control characters. Model text routinely carries raw
//! newlines inside string values; the sanitizer escapes those instead of
//! dropping them, so code fields keep their line structure.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{GeneratedChallenge, GenerationAttempt};
use crate::error::GenerationError;
use crate::util::short_id;

pub const DEFAULT_INITIAL_CODE: &str = "# Write your Python code here\n";

/// Challenge fields as the model emitted them, before normalization.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ChallengeDraft {
  #[serde(default)] pub title: Option<String>,
  #[serde(default)] pub slug: Option<String>,
  #[serde(default)] pub description: Option<String>,
  #[serde(default)] pub initial_code: Option<String>,
  #[serde(default)] pub test_code: Option<String>,
  #[serde(default)] pub reference_solution: Option<String>,
  #[serde(default, deserialize_with = "lenient_xp")] pub xp_reward: Option<u32>,
}

/// Accepts numbers or numeric strings; anything below 1 counts as missing.
fn lenient_xp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
  let raw = Option::<Value>::deserialize(d)?;
  let n = match raw {
    Some(Value::Number(n)) => n.as_f64(),
    Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
    _ => None,
  };
  Ok(n.filter(|x| x.is_finite() && *x >= 1.0).map(|x| x.min(u32::MAX as f64) as u32))
}

fn object_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

/// First `{` through last `}`; without braces, the text minus Markdown fences.
fn extract_candidate(raw: &str) -> String {
  match object_re().find(raw) {
    Some(m) => m.as_str().to_string(),
    None => raw.replace("```json", "").replace("```", "").trim().to_string(),
  }
}

/// Drop non-printable control characters. Inside string literals, newline,
/// carriage return and tab are escaped; outside they are kept as whitespace.
fn sanitize_controls(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut in_string = false;
  let mut escaped = false;
  for ch in s.chars() {
    if in_string {
      if escaped {
        escaped = false;
        out.push(ch);
        continue;
      }
      match ch {
        '\\' => { escaped = true; out.push(ch); }
        '"' => { in_string = false; out.push(ch); }
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c.is_control() => {}
        c => out.push(c),
      }
    } else {
      match ch {
        '"' => { in_string = true; out.push(ch); }
        '\n' | '\r' | '\t' => out.push(ch),
        c if c.is_control() => {}
        c => out.push(c),
      }
    }
  }
  out
}

/// Turn raw model text into a draft, or a `Parse` error when nothing usable is there.
pub fn parse_model_output(raw: &str) -> Result<ChallengeDraft, GenerationError> {
  let candidate = extract_candidate(raw);

  let draft = match serde_json::from_str::<ChallengeDraft>(&candidate) {
    Ok(d) => d,
    Err(first) => {
      warn!(target: "generator", error = %first, "JSON parse error; retrying after control-character cleanup");
      serde_json::from_str::<ChallengeDraft>(&sanitize_controls(&candidate))
        .map_err(|e| GenerationError::Parse(e.to_string()))?
    }
  };

  let blank = |f: &Option<String>| f.as_deref().map_or(true, |s| s.trim().is_empty());
  if blank(&draft.reference_solution) {
    return Err(GenerationError::Parse("missing reference_solution".into()));
  }
  if blank(&draft.test_code) {
    return Err(GenerationError::Parse("missing test_code".into()));
  }
  debug!(target: "generator", title = ?draft.title, slug = ?draft.slug, "Model output parsed");
  Ok(draft)
}

/// Lower-case and keep only `[a-z0-9-]`; empty results fall back to `lvl-<level>`.
pub fn sanitize_slug(raw: Option<&str>, level_number: u32) -> String {
  let cleaned: String = raw
    .unwrap_or_default()
    .to_lowercase()
    .chars()
    .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
    .collect();
  let cleaned = cleaned.trim_matches('-');
  if cleaned.is_empty() { format!("lvl-{level_number}") } else { cleaned.to_string() }
}

/// `<slug>[-u<user>]-<8 hex>`.
pub fn namespace_slug(raw: Option<&str>, level_number: u32, user_id: Option<u64>) -> String {
  let base = sanitize_slug(raw, level_number);
  match user_id {
    Some(uid) => format!("{base}-u{uid}-{}", short_id()),
    None => format!("{base}-{}", short_id()),
  }
}

impl ChallengeDraft {
  /// Fill defaults and namespace the slug. Consumes the draft, so a challenge is
  /// namespaced exactly once per attempt.
  pub fn normalize(self, attempt: &GenerationAttempt, default_xp: u32) -> GeneratedChallenge {
    let level = attempt.level_number;
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    GeneratedChallenge {
      slug: namespace_slug(self.slug.as_deref(), level, attempt.user_id),
      title: non_blank(self.title).unwrap_or_else(|| format!("Level {level} Challenge")),
      description: non_blank(self.description).unwrap_or_else(|| format!("Complete the Level {level} challenge.")),
      initial_code: non_blank(self.initial_code).unwrap_or_else(|| DEFAULT_INITIAL_CODE.to_string()),
      test_code: self.test_code.unwrap_or_default(),
      reference_solution: self.reference_solution.unwrap_or_default(),
      xp_reward: self.xp_reward.unwrap_or(default_xp),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const VALID: &str = r##"{
    "title": "Say Hello",
    "slug": "lvl-1-say-hello",
    "description": "Print hello.",
    "initial_code": "# your code",
    "test_code": "def check(scope):\n    assert 'msg' in scope",
    "reference_solution": "msg = 'hello'\nprint(msg)",
    "xp_reward": 60
  }"##;

  fn slug_re() -> Regex {
    Regex::new(r"^[a-z0-9-]+(-u\d+)?-[0-9a-f]{8}$").unwrap()
  }

  #[test]
  fn clean_json_parses() {
    let d = parse_model_output(VALID).unwrap();
    assert_eq!(d.title.as_deref(), Some("Say Hello"));
    assert_eq!(d.xp_reward, Some(60));
    assert!(d.test_code.unwrap().contains("\n    assert"));
  }

  #[test]
  fn object_is_extracted_from_prose_and_fences() {
    let raw = format!("Sure! Here it is:\n```json\n{VALID}\n```\nGood luck!");
    assert_eq!(parse_model_output(&raw).unwrap(), parse_model_output(VALID).unwrap());
  }

  #[test]
  fn raw_newlines_inside_strings_are_repaired() {
    let raw = "{\"title\": \"T\", \"test_code\": \"def check(scope):\n\tassert scope['x'] == 1\", \"reference_solution\": \"x = 1\u{7}\"}";
    let d = parse_model_output(raw).unwrap();
    assert_eq!(d.test_code.as_deref(), Some("def check(scope):\n\tassert scope['x'] == 1"));
    assert_eq!(d.reference_solution.as_deref(), Some("x = 1"));
  }

  #[test]
  fn escaped_quotes_survive_sanitizing() {
    let s = sanitize_controls("{\"a\": \"say \\\"hi\\\"\nnow\"}");
    let v: Value = serde_json::from_str(&s).unwrap();
    assert_eq!(v["a"], "say \"hi\"\nnow");
  }

  #[test]
  fn garbage_is_a_parse_error() {
    assert!(matches!(parse_model_output("I cannot help with that."), Err(GenerationError::Parse(_))));
    assert!(matches!(parse_model_output("{ not json at all }"), Err(GenerationError::Parse(_))));
  }

  #[test]
  fn missing_code_fields_are_parse_errors() {
    let err = parse_model_output(r#"{"title": "T", "test_code": "def check(scope): pass"}"#).unwrap_err();
    assert!(err.to_string().contains("reference_solution"));
    let err = parse_model_output(r#"{"reference_solution": "x = 1", "test_code": "  "}"#).unwrap_err();
    assert!(err.to_string().contains("test_code"));
  }

  #[test]
  fn xp_reward_is_lenient() {
    let parse = |xp: &str| {
      parse_model_output(&format!(r#"{{"test_code": "t", "reference_solution": "r", "xp_reward": {xp}}}"#))
        .unwrap()
        .xp_reward
    };
    assert_eq!(parse("\"75\""), Some(75));
    assert_eq!(parse("12.9"), Some(12));
    assert_eq!(parse("0"), None);
    assert_eq!(parse("-5"), None);
    assert_eq!(parse("null"), None);
  }

  #[test]
  fn normalize_fills_blank_fields() {
    let draft = ChallengeDraft {
      title: Some("  ".into()),
      initial_code: None,
      test_code: Some("def check(scope): pass".into()),
      reference_solution: Some("pass".into()),
      ..Default::default()
    };
    let ch = draft.normalize(&GenerationAttempt::new(3, None), 50);
    assert_eq!(ch.title, "Level 3 Challenge");
    assert_eq!(ch.initial_code, DEFAULT_INITIAL_CODE);
    assert_eq!(ch.xp_reward, 50);
    assert!(ch.slug.starts_with("lvl-3-"));
    assert!(slug_re().is_match(&ch.slug));
  }

  #[test]
  fn slug_is_sanitized_and_namespaced() {
    assert_eq!(sanitize_slug(Some("Lvl-1: Hello World!"), 1), "lvl-1helloworld");
    assert_eq!(sanitize_slug(Some("!!!"), 4), "lvl-4");
    assert_eq!(sanitize_slug(None, 2), "lvl-2");

    let with_user = namespace_slug(Some("lvl-1-print"), 1, Some(42));
    assert!(slug_re().is_match(&with_user), "{with_user}");
    assert!(with_user.starts_with("lvl-1-print-u42-"));

    let anon = namespace_slug(Some("lvl-1-print"), 1, None);
    assert!(slug_re().is_match(&anon));
    assert_eq!(anon.len(), "lvl-1-print".len() + 9);
  }

  #[test]
  fn repeated_namespacing_is_unique() {
    let a = namespace_slug(Some("same"), 1, None);
    let b = namespace_slug(Some("same"), 1, None);
    assert_ne!(a, b);
  }
}
