//! Remote backend: a Piston code-execution service.
//!
//! The requested runtime is confirmed (and installed on demand) before the first
//! execution; only a successful check is remembered, so a service that comes up
//! later is picked up on the next call.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};

use super::ExecutionBackend;
use crate::config::PistonSettings;
use crate::domain::{SandboxFailure, VerificationResult};
use crate::util::trunc_for_log;

const BACKEND: &str = "Piston";
/// Added to the run and compile limits for the HTTP round trip.
const HTTP_SLACK: Duration = Duration::from_secs(5);

pub struct PistonBackend {
    client: reqwest::Client,
    settings: PistonSettings,
    runtime_ready: OnceCell<()>,
}

impl PistonBackend {
    pub fn new(settings: PistonSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.compile_timeout + settings.run_timeout + HTTP_SLACK)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, settings, runtime_ready: OnceCell::new() }
    }

    async fn ensure_runtime(&self) -> bool {
        self.runtime_ready
            .get_or_try_init(|| self.probe_or_install())
            .await
            .is_ok()
    }

    fn wanted_version_prefix(&self) -> String {
        self.settings.version.split('.').take(2).collect::<Vec<_>>().join(".")
    }

    #[instrument(level = "info", skip(self), fields(language = %self.settings.language, version = %self.settings.version))]
    async fn probe_or_install(&self) -> Result<(), String> {
        let url = format!("{}/api/v2/runtimes", self.settings.url);
        let res = self.client.get(&url).send().await.map_err(|e| {
            error!(target: "sandbox", error = %e, "Piston unreachable");
            e.to_string()
        })?;
        if !res.status().is_success() {
            error!(target: "sandbox", status = %res.status(), "Piston unavailable");
            return Err(format!("runtimes HTTP {}", res.status()));
        }

        let runtimes: Vec<Runtime> = res.json().await.map_err(|e| e.to_string())?;
        let prefix = self.wanted_version_prefix();
        let installed = runtimes.iter().any(|r| {
            (r.language == self.settings.language || r.aliases.iter().any(|a| *a == self.settings.language))
                && r.version.starts_with(&prefix)
        });
        if installed {
            return Ok(());
        }

        info!(target: "sandbox", "Installing runtime in Piston");
        let res = self
            .client
            .post(format!("{}/api/v2/packages", self.settings.url))
            .json(&PackageRequest { language: &self.settings.language, version: &self.settings.version })
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if res.status().is_success() {
            info!(target: "sandbox", "Runtime installed");
            Ok(())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            error!(target: "sandbox", %status, body = %trunc_for_log(&body, 300), "Runtime installation failed");
            Err(format!("install HTTP {status}"))
        }
    }
}

#[async_trait]
impl ExecutionBackend for PistonBackend {
    fn name(&self) -> &'static str {
        "piston"
    }

    #[instrument(level = "info", skip_all, fields(program_len = program.len()))]
    async fn run(&self, program: &str) -> VerificationResult {
        if !self.ensure_runtime().await {
            return VerificationResult::failed("Execution Environment Unavailable", SandboxFailure::NotReady);
        }

        let req = ExecuteRequest {
            language: &self.settings.language,
            version: &self.settings.version,
            files: vec![SourceFile { name: "challenge.py", content: program }],
            stdin: "",
            args: Vec::new(),
            compile_timeout: self.settings.compile_timeout.as_millis() as u64,
            run_timeout: self.settings.run_timeout.as_millis() as u64,
            run_memory_limit: self.settings.memory_limit_bytes,
        };

        let res = match self.client.post(format!("{}/api/v2/execute", self.settings.url)).json(&req).send().await {
            Ok(res) => res,
            Err(e) if e.is_connect() => {
                warn!(target: "sandbox", error = %e, "Piston went away");
                return VerificationResult::failed("", SandboxFailure::NotReady);
            }
            Err(e) => {
                error!(target: "sandbox", error = %e, "Sandbox execution error");
                return VerificationResult::failed("", SandboxFailure::Transport(e.to_string()));
            }
        };

        let status = res.status();
        let body = match res.text().await {
            Ok(b) => b,
            Err(e) => return VerificationResult::failed("", SandboxFailure::Transport(e.to_string())),
        };
        let parsed = serde_json::from_str::<ExecuteResponse>(&body).ok();
        let run = parsed.and_then(|p| p.run);
        let output = run.as_ref().map(RunStage::output).unwrap_or_default();

        if status != reqwest::StatusCode::OK {
            warn!(target: "sandbox", %status, body = %trunc_for_log(&body, 300), "Piston rejected execution");
            return VerificationResult::failed(
                output,
                SandboxFailure::Backend { backend: BACKEND.into(), detail: status.as_u16().to_string() },
            );
        }

        let Some(run) = run else {
            return VerificationResult::failed(
                "",
                SandboxFailure::Backend { backend: BACKEND.into(), detail: "malformed response".into() },
            );
        };

        let timeout = SandboxFailure::Timeout { limit: self.settings.run_timeout };
        match (run.status.as_deref(), run.code, run.signal.as_deref()) {
            (Some("TO"), _, _) => VerificationResult::failed(output, timeout),
            (Some("XX"), _, _) => {
                let detail = run.message.clone().unwrap_or_else(|| "internal error".into());
                warn!(target: "sandbox", %detail, "Piston internal error");
                VerificationResult::failed(output, SandboxFailure::Backend { backend: BACKEND.into(), detail })
            }
            // RE, SG (memory kills land here), OL and EL: the program's own fault.
            (Some(_), _, _) => VerificationResult::failed(run.output_with_message(), SandboxFailure::TestsFailed),
            (None, Some(0), _) => VerificationResult::passed(output),
            // Older Piston releases report no status; a bare SIGKILL there is the run timeout.
            (None, None, Some("SIGKILL")) => VerificationResult::failed(output, timeout),
            _ => VerificationResult::failed(output, SandboxFailure::TestsFailed),
        }
    }
}

#[derive(Deserialize)]
struct Runtime {
    language: String,
    version: String,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Serialize)]
struct PackageRequest<'a> {
    language: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
struct SourceFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<SourceFile<'a>>,
    stdin: &'a str,
    args: Vec<String>,
    compile_timeout: u64,
    run_timeout: u64,
    run_memory_limit: u64,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    run: Option<RunStage>,
}

#[derive(Deserialize)]
struct RunStage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    signal: Option<String>,
    /// `RE`, `SG`, `TO`, `OL`, `EL` or `XX` on abnormal runs.
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RunStage {
    fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    fn output_with_message(&self) -> String {
        match &self.message {
            Some(m) if !m.is_empty() => format!("{}\n{m}", self.output()),
            _ => self.output(),
        }
    }
}
