//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs sizes and basic result info, never code.

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use tracing::{info, instrument, warn};

use crate::error::GuidanceError;
use crate::logic::{generate_hint, review_submission, run_generation_job};
use crate::protocol::*;
use crate::state::AppState;

impl IntoResponse for GuidanceError {
  fn into_response(self) -> Response {
    let status = match self {
      GuidanceError::InvalidHintLevel(_) => StatusCode::BAD_REQUEST,
      GuidanceError::Model(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ErrorOut::new(self.to_string()))).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { status: "ok".into() }) }

#[instrument(level = "info", skip(state, body), fields(level_number = body.level_number, user_id = ?body.user_id))]
pub async fn http_generate_level(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateLevelIn>,
) -> Response {
  let level_number = match u32::try_from(body.level_number) {
    Ok(n) if n >= 1 => n,
    _ => {
      warn!(target: "forge_ai", level_number = body.level_number, "Rejected generation request");
      return (StatusCode::BAD_REQUEST, Json(ErrorOut::new("level_number must be a positive integer"))).into_response();
    }
  };

  tokio::spawn(run_generation_job(state.clone(), level_number, body.user_id));
  info!(target: "forge_ai", %level_number, user_id = ?body.user_id, "Generation job scheduled");
  (
    StatusCode::ACCEPTED,
    Json(GenerateLevelAccepted { status: "accepted", level_number, user_id: body.user_id }),
  ).into_response()
}

#[instrument(level = "info", skip(state, body), fields(user_len = body.user_code.len(), test_len = body.test_code.len()))]
pub async fn http_verify(
  State(state): State<Arc<AppState>>,
  Json(body): Json<VerifyIn>,
) -> impl IntoResponse {
  let result = state.sandbox.verify(&body.user_code, &body.test_code).await;
  info!(target: "sandbox", passed = result.passed, error = ?result.error_message(), "HTTP verify served");
  Json(result)
}

#[instrument(level = "info", skip(state, body), fields(hint_level = body.hint_level))]
pub async fn http_hints(
  State(state): State<Arc<AppState>>,
  Json(body): Json<HintIn>,
) -> Result<Json<HintOut>, GuidanceError> {
  let hint = generate_hint(&state, &body).await?;
  info!(target: "forge_ai", hint_len = hint.len(), "HTTP hint served");
  Ok(Json(HintOut { hint }))
}

#[instrument(level = "info", skip(state, body), fields(code_len = body.user_code.len()))]
pub async fn http_analyze(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnalyzeIn>,
) -> Result<Json<AnalyzeOut>, GuidanceError> {
  let review = review_submission(&state, &body).await?;
  info!(target: "forge_ai", review_len = review.len(), "HTTP review served");
  Ok(Json(AnalyzeOut { review }))
}
