//! Curriculum blueprints: which topic, concepts and difficulty a level should target.
//!
//! The platform's curriculum is an external collaborator; `StaticCurriculum` is the
//! built-in table used when nothing else is wired in.

use async_trait::async_trait;

use crate::domain::{ChallengeBlueprint, Difficulty};
use crate::error::CurriculumError;

#[async_trait]
pub trait BlueprintProvider: Send + Sync {
  async fn get_blueprint(&self, level_number: u32) -> Result<ChallengeBlueprint, CurriculumError>;
}

/// Ordered topic tiers; levels past the end keep practising the last tier.
const TIERS: &[(&str, &[&str])] = &[
  ("printing", &["print"]),
  ("variables", &["assignment", "print"]),
  ("arithmetic", &["operators", "integer division", "modulo"]),
  ("strings", &["concatenation", "f-strings", "len"]),
  ("conditionals", &["if", "elif", "else", "comparison"]),
  ("loops", &["for", "range", "while"]),
  ("lists", &["indexing", "append", "slicing"]),
  ("functions", &["def", "parameters", "return"]),
  ("dictionaries", &["keys", "values", "items"]),
  ("comprehensions", &["list comprehension", "filtering"]),
  ("error handling", &["try", "except", "raise"]),
  ("classes", &["class", "__init__", "methods"]),
  ("recursion", &["base case", "recursive call"]),
  ("generators", &["yield", "iteration"]),
];

#[derive(Clone, Debug, Default)]
pub struct StaticCurriculum;

impl StaticCurriculum {
  pub fn blueprint(level_number: u32) -> Result<ChallengeBlueprint, CurriculumError> {
    if level_number == 0 {
      return Err(CurriculumError::InvalidLevel(level_number));
    }
    let idx = ((level_number - 1) as usize).min(TIERS.len() - 1);
    let (topic, concepts) = TIERS[idx];

    let third = TIERS.len().div_ceil(3);
    let difficulty = if idx < third {
      Difficulty::Beginner
    } else if idx < 2 * third {
      Difficulty::Intermediate
    } else {
      Difficulty::Advanced
    };

    Ok(ChallengeBlueprint {
      level_number,
      topic: topic.to_string(),
      concepts: concepts.iter().map(|c| c.to_string()).collect(),
      difficulty,
    })
  }
}

#[async_trait]
impl BlueprintProvider for StaticCurriculum {
  async fn get_blueprint(&self, level_number: u32) -> Result<ChallengeBlueprint, CurriculumError> {
    Self::blueprint(level_number)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_one_is_printing_for_beginners() {
    let bp = StaticCurriculum::blueprint(1).unwrap();
    assert_eq!(bp.topic, "printing");
    assert_eq!(bp.concepts, vec!["print"]);
    assert_eq!(bp.difficulty, Difficulty::Beginner);
  }

  #[test]
  fn difficulty_rises_and_levels_past_the_table_clamp() {
    assert_eq!(StaticCurriculum::blueprint(8).unwrap().difficulty, Difficulty::Intermediate);
    let late = StaticCurriculum::blueprint(500).unwrap();
    assert_eq!(late.topic, "generators");
    assert_eq!(late.difficulty, Difficulty::Advanced);
    assert_eq!(late.level_number, 500);
  }

  #[test]
  fn level_zero_is_invalid() {
    assert_eq!(StaticCurriculum::blueprint(0), Err(CurriculumError::InvalidLevel(0)));
  }
}
