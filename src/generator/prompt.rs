//! Drafting prompts built from a curriculum blueprint.

use crate::config::Prompts;
use crate::domain::ChallengeBlueprint;
use crate::util::fill_template;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DraftPrompt {
  pub system: String,
  pub user: String,
}

pub fn drafting_prompt(prompts: &Prompts, blueprint: &ChallengeBlueprint) -> DraftPrompt {
  let concepts = blueprint.concepts.join(", ");
  let difficulty = blueprint.difficulty.to_string();
  let level = blueprint.level_number.to_string();
  let pairs = [
    ("topic", blueprint.topic.as_str()),
    ("concepts", concepts.as_str()),
    ("difficulty", difficulty.as_str()),
    ("level", level.as_str()),
  ];
  DraftPrompt {
    system: fill_template(&prompts.generation_system, &pairs),
    user: fill_template(&prompts.generation_user_template, &pairs),
  }
}
