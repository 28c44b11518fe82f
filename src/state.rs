//! Application state shared by every handler.
//!
//! Built once at startup from `Settings`. Everything inside is immutable or
//! internally synchronized, so requests and background jobs share it through an `Arc`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::Settings;
use crate::curriculum::{BlueprintProvider, StaticCurriculum};
use crate::delivery::CoreClient;
use crate::error::ConfigurationError;
use crate::generator::ChallengeGenerator;
use crate::llm::LlmProviders;
use crate::sandbox::{Sandbox, Verifier};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub llm: LlmProviders,
    pub sandbox: Arc<dyn Verifier>,
    pub generator: ChallengeGenerator,
    pub curriculum: Arc<dyn BlueprintProvider>,
    pub core: CoreClient,
}

impl AppState {
    /// Resolve model providers and the sandbox backend. Fails when no provider is usable.
    #[instrument(level = "info", skip_all)]
    pub fn new(settings: Settings) -> Result<Self, ConfigurationError> {
        let llm = LlmProviders::from_settings(&settings.llm)?;
        let sandbox = Sandbox::from_settings(&settings.sandbox, &settings.security);
        info!(
            target: "forge_ai",
            primary = llm.get_primary().name(),
            fallback = llm.get_fallback().name(),
            sandbox = sandbox.backend_name(),
            "Generation pipeline configured"
        );
        let state = Self::from_parts(settings, llm, Arc::new(sandbox), Arc::new(StaticCurriculum));
        info!(target: "forge_ai", core = %state.core.endpoint(), "Application state ready");
        Ok(state)
    }

    pub fn from_parts(
        settings: Settings,
        llm: LlmProviders,
        sandbox: Arc<dyn Verifier>,
        curriculum: Arc<dyn BlueprintProvider>,
    ) -> Self {
        let generator = ChallengeGenerator::new(
            llm.clone(),
            sandbox.clone(),
            settings.prompts.clone(),
            settings.generation.clone(),
        );
        let core = CoreClient::new(
            &settings.core_service_url,
            &settings.core_challenge_path,
            &settings.internal_api_key,
        );
        Self { settings, llm, sandbox, generator, curriculum, core }
    }
}

#[cfg(test)]
pub mod testing {
    //! State wired to scripted collaborators, shared by handler and job tests.

    use super::*;
    use crate::domain::VerificationResult;
    use crate::llm::testing::ScriptedModel;
    use async_trait::async_trait;

    pub const TEST_KEY: &str = "internal-secret";

    pub struct FixedVerifier(pub VerificationResult);

    #[async_trait]
    impl Verifier for FixedVerifier {
        async fn verify(&self, _user_code: &str, _test_code: &str) -> VerificationResult {
            self.0.clone()
        }
    }

    pub fn settings(core_url: &str) -> Settings {
        let pairs = [("CORE_SERVICE_URL", core_url), ("INTERNAL_API_KEY", TEST_KEY), ("GROQ_API_KEY", "g")];
        Settings::from_lookup(|k| pairs.iter().find(|(key, _)| *key == k).map(|(_, v)| v.to_string()))
            .expect("test settings")
    }

    pub fn state(core_url: &str, model: Arc<ScriptedModel>, verdict: VerificationResult) -> Arc<AppState> {
        Arc::new(AppState::from_parts(
            settings(core_url),
            LlmProviders::new(model.clone(), model),
            Arc::new(FixedVerifier(verdict)),
            Arc::new(StaticCurriculum),
        ))
    }
}
