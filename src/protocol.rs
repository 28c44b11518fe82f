//! Request and response bodies of the HTTP API (serde ready).
//! Keep this small and stable; the core service and the frontend both depend on it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthOut {
    pub status: String,
}

/// `level_number` is signed so that 0 and negatives reach validation instead of
/// failing deserialization.
#[derive(Debug, Deserialize)]
pub struct GenerateLevelIn {
    pub level_number: i64,
    #[serde(default)]
    pub user_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GenerateLevelAccepted {
    pub status: &'static str,
    pub level_number: u32,
    pub user_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyIn {
    pub user_code: String,
    pub test_code: String,
}

fn default_hint_level() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct HintIn {
    pub challenge_title: String,
    pub challenge_description: String,
    pub user_code: String,
    #[serde(default = "default_hint_level")]
    pub hint_level: i64,
    #[serde(default)]
    pub user_xp: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HintOut {
    pub hint: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeIn {
    pub challenge_title: String,
    pub challenge_description: String,
    pub user_code: String,
    #[serde(default)]
    pub test_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeOut {
    pub review: String,
}

/// Error body, `{"detail": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub detail: String,
}

impl ErrorOut {
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}
