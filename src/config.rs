use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::persona::Persona;
use crate::prompt_pipeline::PromptOverrides;

pub const AZURE_DEFAULT_API_VERSION: &str = "2024-02-15-preview";

const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";

/// Connection settings for an Azure OpenAI deployment, as saved by the user.
/// Blank fields fall back to the environment when resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfiguration {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

/// Fully resolved settings; every field is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApiConfiguration {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl ApiConfiguration {
    pub fn is_empty(&self) -> bool {
        [&self.endpoint, &self.api_key, &self.deployment, &self.api_version]
            .iter()
            .all(|v| v.trim().is_empty())
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<ResolvedApiConfiguration> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Saved value first, then `env(name)`. The API version has a built-in default.
    pub fn resolve_with<F>(&self, env: F) -> Result<ResolvedApiConfiguration>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |saved: &str, name: &str| -> Option<String> {
            let saved = saved.trim();
            if !saved.is_empty() {
                return Some(saved.to_string());
            }
            env(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut missing = Vec::new();
        let endpoint = pick(&self.endpoint, ENV_ENDPOINT);
        if endpoint.is_none() {
            missing.push("endpoint");
        }
        let api_key = pick(&self.api_key, ENV_API_KEY);
        if api_key.is_none() {
            missing.push("API key");
        }
        let deployment = pick(&self.deployment, ENV_DEPLOYMENT);
        if deployment.is_none() {
            missing.push("deployment");
        }
        let api_version = pick(&self.api_version, ENV_API_VERSION)
            .unwrap_or_else(|| AZURE_DEFAULT_API_VERSION.to_string());

        match (endpoint, api_key, deployment) {
            (Some(endpoint), Some(api_key), Some(deployment)) => Ok(ResolvedApiConfiguration {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_key,
                deployment,
                api_version,
            }),
            _ => Err(ChatError::Configuration(format!(
                "Azure OpenAI is not configured (missing {}). Open the API settings to add it.",
                missing.join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureToggles {
    pub suggestions_enabled: bool,
    pub inline_suggestions_enabled: bool,
    pub contextual_hook_enabled: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            suggestions_enabled: true,
            inline_suggestions_enabled: true,
            contextual_hook_enabled: true,
        }
    }
}

/// Configuration captured when a turn starts. Edits made while the turn is
/// in flight only affect the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub toggles: FeatureToggles,
    pub persona: Persona,
    pub overrides: PromptOverrides,
}
