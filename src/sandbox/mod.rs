//! Sandbox executor: runs a solution against its tests and classifies the outcome.
//!
//! Policy, in order:
//!   1. the security analyzer inspects the combined source; a rejection never
//!      reaches an execution backend,
//!   2. solution and tests are joined with a blank line, followed by the runner
//!      that calls `check(scope)` with the program's top-level names,
//!   3. one backend (remote Piston service or local subprocess) executes it.
//!
//! Success is derived from the exit status only, never from printed text.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::config::{SandboxSettings, SecuritySettings};
use crate::domain::{SandboxFailure, VerificationResult};
use crate::security::SecurityAnalyzer;

pub mod local;
pub mod piston;

pub use local::LocalSubprocess;
pub use piston::PistonBackend;

/// Calls the test entry point with the program's globals as the scope mapping.
pub const CHECK_RUNNER: &str = "\n\nif callable(globals().get('check')):\n    check(dict(globals()))\n";

/// Anything able to verify a solution against its tests.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, user_code: &str, test_code: &str) -> VerificationResult;
}

/// Executes an already vetted program. Infrastructure trouble is reported in the
/// result, never raised.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, program: &str) -> VerificationResult;
}

pub fn combine_sources(user_code: &str, test_code: &str) -> String {
    format!("{user_code}\n\n{test_code}")
}

pub struct Sandbox {
    analyzer: SecurityAnalyzer,
    backend: Arc<dyn ExecutionBackend>,
}

impl Sandbox {
    pub fn new(analyzer: SecurityAnalyzer, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { analyzer, backend }
    }

    pub fn from_settings(sandbox: &SandboxSettings, security: &SecuritySettings) -> Self {
        let backend: Arc<dyn ExecutionBackend> = match sandbox {
            SandboxSettings::Piston(p) => Arc::new(PistonBackend::new(p.clone())),
            SandboxSettings::Local(l) => Arc::new(LocalSubprocess::new(l.clone())),
        };
        info!(target: "sandbox", backend = backend.name(), "Sandbox backend selected");
        Self::new(SecurityAnalyzer::new(security), backend)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[async_trait]
impl Verifier for Sandbox {
    #[instrument(level = "info", skip_all, fields(backend = self.backend.name(), user_len = user_code.len(), test_len = test_code.len()))]
    async fn verify(&self, user_code: &str, test_code: &str) -> VerificationResult {
        let source = combine_sources(user_code, test_code);

        let analysis = self.analyzer.analyze(&source);
        if !analysis.safe {
            let reason = analysis.error.unwrap_or_else(|| "Rejected by security analyzer".into());
            warn!(target: "sandbox", %reason, "Static analysis rejected submission");
            return VerificationResult::failed("", SandboxFailure::Rejected(reason));
        }

        let program = format!("{source}{CHECK_RUNNER}");
        let result = self.backend.run(&program).await;
        info!(target: "sandbox", passed = result.passed, error = ?result.error_message(), output_len = result.output.len(), "Verification finished");
        result
    }
}
