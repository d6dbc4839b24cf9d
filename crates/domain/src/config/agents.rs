use serde::{Deserialize, Serialize};

use crate::capability::{AgentCapabilitySet, Capability};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logical agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A logical agent: a named provider/model pairing exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider name (`openai`, `anthropic`, `deepseek`, `google`, `xai`,
    /// `perplexity`, `openrouter`).
    pub provider: String,
    pub model: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilitySet,
    /// Provider-side prompt ceiling in estimated tokens.
    #[serde(default = "d_32000")]
    pub max_prompt_tokens: usize,
    #[serde(default = "d_1024")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Model id on the aggregation provider. Defaults to `{provider}/{model}`.
    #[serde(default)]
    pub aggregator_model: Option<String>,
    /// Composite routing: requests that need `capability` are served by
    /// `agent` instead when this agent lacks it.
    #[serde(default)]
    pub reroutes: Vec<RerouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerouteConfig {
    pub capability: Capability,
    pub agent: String,
}

impl AgentConfig {
    pub fn aggregator_model_id(&self) -> String {
        self.aggregator_model
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.provider, self.model))
    }

    /// The reroute target for `cap`, if this agent cannot serve it itself.
    pub fn reroute_for(&self, cap: Capability) -> Option<&str> {
        if self.capabilities.supports(cap) {
            return None;
        }
        self.reroutes
            .iter()
            .find(|r| r.capability == cap)
            .map(|r| r.agent.as_str())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_32000() -> usize {
    32_000
}
fn d_1024() -> u32 {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(toml_str: &str) -> AgentConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn aggregator_model_defaults_to_provider_slash_model() {
        let a = agent(
            r#"
            provider = "anthropic"
            model = "claude-sonnet-4"
        "#,
        );
        assert_eq!(a.aggregator_model_id(), "anthropic/claude-sonnet-4");
        assert_eq!(a.max_prompt_tokens, 32_000);
    }

    #[test]
    fn reroute_only_when_capability_missing() {
        let a = agent(
            r#"
            provider = "deepseek"
            model = "deepseek-reasoner"

            [[reroutes]]
            capability = "image_generation"
            agent = "gpt"
        "#,
        );
        assert_eq!(a.reroute_for(Capability::ImageGeneration), Some("gpt"));
        assert_eq!(a.reroute_for(Capability::Text), None);
    }
}
