//! Small utility helpers used across modules.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use uuid::Uuid;

fn placeholder_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("static regex"))
}

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values, in a
/// single pass: substituted values are never scanned again. Unknown keys stay as-is.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  placeholder_re()
    .replace_all(tpl, |caps: &Captures| {
      let key = &caps[1];
      match pairs.iter().find(|(k, _)| *k == key) {
        Some((_, v)) => (*v).to_string(),
        None => caps[0].to_string(),
      }
    })
    .into_owned()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

/// Eight lowercase hex characters, fresh per call.
pub fn short_id() -> String {
  Uuid::new_v4().simple().to_string()[..8].to_string()
}
