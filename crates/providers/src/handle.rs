use std::fmt;

use serde::Serialize;

use cg_domain::capability::AgentCapabilitySet;

/// Wire protocol family of a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// OpenAI chat completions (OpenAI, DeepSeek, xAI, Perplexity,
    /// Google's compatibility endpoint, OpenRouter).
    OpenaiCompat,
    /// Anthropic messages API.
    Anthropic,
}

/// Where the credential on a handle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    TenantKey,
    SharedKey,
    None,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::TenantKey => "tenant_key",
            CredentialSource::SharedKey => "shared_key",
            CredentialSource::None => "none",
        }
    }
}

/// A secret that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw secret, for building an auth header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential(<redacted>)")
        }
    }
}

/// A concrete, callable model endpoint resolved for one request.
///
/// Never cached: tenant credentials may rotate between requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHandle {
    /// Logical agent that was resolved (after any reroute).
    pub agent_name: String,
    /// Provider name the call goes to (`openrouter` when aggregated).
    pub provider: String,
    pub wire: WireFormat,
    pub base_url: String,
    pub model_id: String,
    pub credential: Credential,
    pub credential_source: CredentialSource,
    /// True when the call goes through the aggregation provider.
    pub via_aggregator: bool,
    /// Original agent when a composite reroute happened.
    pub rerouted_from: Option<String>,
    pub capabilities: AgentCapabilitySet,
    pub max_prompt_tokens: usize,
    pub max_output_tokens: u32,
    pub temperature: Option<f64>,
}

impl ProviderHandle {
    /// Degraded handles carry no credential and fail at call time.
    pub fn is_degraded(&self) -> bool {
        self.credential.is_empty()
    }
}
