//! Forge AI · challenge generation service
//!
//! - Axum HTTP API (generation trigger, sandbox verification, hints, code review)
//! - LLM providers: Groq, OpenAI, Anthropic with primary/fallback selection
//! - Sandbox: remote Piston service or local Python subprocess, behind a static analyzer
//!
//! Important env variables:
//!   PORT                  : u16 (default 8001)
//!   CORE_SERVICE_URL      : persistence API base URL (required)
//!   INTERNAL_API_KEY      : shared key for X-Internal-API-Key (required)
//!   LLM_PROVIDER          : auto | groq | openai | anthropic (default auto)
//!   GROQ_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY : at least one is required
//!   SANDBOX_BACKEND       : piston (default) | local
//!   PISTON_URL            : default "http://piston:2000"
//!   PROMPTS_CONFIG_PATH   : optional TOML file overriding prompt texts
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"
//!
//! The full list lives in `config::Settings::from_lookup`.

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod security;
mod sandbox;
mod llm;
mod curriculum;
mod generator;
mod guidance;
mod delivery;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Settings;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Configuration problems are fatal: never serve generation without a usable setup.
  let settings = Settings::from_env().map_err(|e| {
    error!(target: "forge_ai", error = %e, "Invalid configuration");
    e
  })?;
  let port = settings.port;

  let state = Arc::new(AppState::new(settings).map_err(|e| {
    error!(target: "forge_ai", error = %e, "Failed to initialise application state");
    e
  })?);

  let app = build_router(state);

  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "forge_ai", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "forge_ai", "HTTP server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "forge_ai", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
}
