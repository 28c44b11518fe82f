//! Client for the persistence API that stores accepted challenges.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::GeneratedChallenge;
use crate::error::DeliveryError;
use crate::util::trunc_for_log;

pub const INTERNAL_KEY_HEADER: &str = "X-Internal-API-Key";

#[derive(Serialize)]
struct CreateChallenge<'a> {
  #[serde(flatten)]
  challenge: &'a GeneratedChallenge,
  order: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  created_for_user_id: Option<u64>,
}

#[derive(Clone)]
pub struct CoreClient {
  client: reqwest::Client,
  endpoint: String,
  api_key: String,
}

impl CoreClient {
  pub fn new(base_url: &str, path: &str, api_key: &str) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    let endpoint = format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'));
    Self { client, endpoint, api_key: api_key.to_string() }
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  /// POST the challenge with its level order. Only 200 and 201 count as stored.
  #[instrument(level = "info", skip(self, challenge), fields(slug = %challenge.slug, order = level_number, user_id = ?user_id))]
  pub async fn deliver(
    &self,
    challenge: &GeneratedChallenge,
    level_number: u32,
    user_id: Option<u64>,
  ) -> Result<(), DeliveryError> {
    let body = CreateChallenge { challenge, order: level_number, created_for_user_id: user_id };
    let res = self.client.post(&self.endpoint)
      .header(USER_AGENT, "forge-ai/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(INTERNAL_KEY_HEADER, &self.api_key)
      .json(&body).send().await?;

    let status = res.status();
    if status == StatusCode::OK || status == StatusCode::CREATED {
      info!(target: "delivery", status = status.as_u16(), "Challenge stored");
      return Ok(());
    }
    let body = res.text().await.unwrap_or_default();
    warn!(target: "delivery", status = status.as_u16(), body = %trunc_for_log(&body, 300), "Persistence API rejected challenge");
    Err(DeliveryError::Status { status: status.as_u16(), body: trunc_for_log(&body, 500) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn challenge() -> GeneratedChallenge {
    GeneratedChallenge {
      title: "Say Hello".into(),
      slug: "lvl-1-hello-u7-0a1b2c3d".into(),
      description: "Print hello.".into(),
      initial_code: "# Write your Python code here\n".into(),
      test_code: "def check(scope):\n    pass".into(),
      reference_solution: "print('hello')".into(),
      xp_reward: 50,
    }
  }

  #[tokio::test]
  async fn posts_challenge_with_order_and_owner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/challenges/internal-create/"))
      .and(header(INTERNAL_KEY_HEADER, "k"))
      .and(body_json(json!({
        "title": "Say Hello",
        "slug": "lvl-1-hello-u7-0a1b2c3d",
        "description": "Print hello.",
        "initial_code": "# Write your Python code here\n",
        "test_code": "def check(scope):\n    pass",
        "reference_solution": "print('hello')",
        "xp_reward": 50,
        "order": 1,
        "created_for_user_id": 7
      })))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let client = CoreClient::new(&format!("{}/", server.uri()), "/api/challenges/internal-create/", "k");
    client.deliver(&challenge(), 1, Some(7)).await.unwrap();
  }

  #[tokio::test]
  async fn anonymous_challenges_omit_the_owner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;

    let client = CoreClient::new(&server.uri(), "/create/", "k");
    client.deliver(&challenge(), 3, None).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["order"], 3);
    assert!(sent.get("created_for_user_id").is_none());
  }

  #[tokio::test]
  async fn other_statuses_are_delivery_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(400).set_body_string("slug already exists"))
      .mount(&server)
      .await;

    let client = CoreClient::new(&server.uri(), "/create/", "k");
    let err = client.deliver(&challenge(), 1, None).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Status { status: 400, ref body } if body.contains("slug already exists")));
  }

  #[tokio::test]
  async fn unreachable_api_is_a_transport_error() {
    let client = CoreClient::new("http://127.0.0.1:9", "/create/", "k");
    assert!(matches!(client.deliver(&challenge(), 1, None).await, Err(DeliveryError::Transport(_))));
  }
}
