//! Turns a logical agent name plus tenant configuration into a callable
//! [`ProviderHandle`].
//!
//! Credential order is fixed: tenant key, shared platform key (free tier
//! only), aggregation provider (tenant key, then shared key on the free
//! tier), and finally a degraded handle with an empty credential that
//! fails at call time with an authentication error.

use std::collections::HashMap;

use cg_domain::capability::Capability;
use cg_domain::config::{AgentConfig, AggregatorConfig, Config};
use cg_domain::error::{Error, Result};
use cg_domain::tenant::{TenantConfig, Tier};
use cg_domain::trace::TraceEvent;

use crate::credentials::{decrypt_or_plain, resolve_api_key, CredentialCipher};
use crate::handle::{Credential, CredentialSource, ProviderHandle, WireFormat};

/// Protocol-level endpoint for a provider, independent of credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub wire: WireFormat,
    pub base_url: String,
    pub model_id: String,
}

/// Maps an agent definition to its endpoint.
pub type ResolveFn = fn(&AgentConfig) -> Endpoint;

// ── built-in endpoint resolvers ─────────────────────────────────────

fn openai_compat(agent: &AgentConfig, default_base: &str) -> Endpoint {
    Endpoint {
        wire: WireFormat::OpenaiCompat,
        base_url: agent
            .base_url
            .clone()
            .unwrap_or_else(|| default_base.to_string()),
        model_id: agent.model.clone(),
    }
}

fn resolve_openai(agent: &AgentConfig) -> Endpoint {
    openai_compat(agent, "https://api.openai.com/v1")
}

fn resolve_deepseek(agent: &AgentConfig) -> Endpoint {
    openai_compat(agent, "https://api.deepseek.com/v1")
}

fn resolve_google(agent: &AgentConfig) -> Endpoint {
    openai_compat(agent, "https://generativelanguage.googleapis.com/v1beta/openai")
}

fn resolve_xai(agent: &AgentConfig) -> Endpoint {
    openai_compat(agent, "https://api.x.ai/v1")
}

fn resolve_perplexity(agent: &AgentConfig) -> Endpoint {
    openai_compat(agent, "https://api.perplexity.ai")
}

fn resolve_openrouter(agent: &AgentConfig) -> Endpoint {
    openai_compat(agent, "https://openrouter.ai/api/v1")
}

fn resolve_anthropic(agent: &AgentConfig) -> Endpoint {
    Endpoint {
        wire: WireFormat::Anthropic,
        base_url: agent
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
        model_id: agent.model.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderResolver {
    agents: HashMap<String, AgentConfig>,
    table: HashMap<String, ResolveFn>,
    /// Platform keys by provider name, resolved once at boot.
    shared_keys: HashMap<String, String>,
    aggregator: AggregatorConfig,
    cipher: Option<CredentialCipher>,
}

impl ProviderResolver {
    pub fn new(
        agents: HashMap<String, AgentConfig>,
        shared_keys: HashMap<String, String>,
        aggregator: AggregatorConfig,
    ) -> Self {
        let mut table: HashMap<String, ResolveFn> = HashMap::new();
        table.insert("openai".into(), resolve_openai);
        table.insert("anthropic".into(), resolve_anthropic);
        table.insert("deepseek".into(), resolve_deepseek);
        table.insert("google".into(), resolve_google);
        table.insert("xai".into(), resolve_xai);
        table.insert("perplexity".into(), resolve_perplexity);
        table.insert("openrouter".into(), resolve_openrouter);
        Self {
            agents,
            table,
            shared_keys,
            aggregator,
            cipher: None,
        }
    }

    /// Build from the full config, reading platform keys from their
    /// configured sources. Missing keys are skipped.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut shared_keys = HashMap::new();
        for (provider, auth) in &config.platform.credentials {
            match resolve_api_key(auth) {
                Ok(key) if !key.is_empty() => {
                    if auth.key.is_some() {
                        tracing::warn!(
                            provider = %provider,
                            "platform key is stored as plaintext in config; prefer env or keychain"
                        );
                    }
                    shared_keys.insert(provider.clone(), key);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "platform key unavailable");
                }
            }
        }
        let cipher = CredentialCipher::from_env(&config.security.credential_key_env)?;
        let mut resolver = Self::new(config.agents.clone(), shared_keys, config.aggregator.clone());
        resolver.cipher = cipher;
        Ok(resolver)
    }

    pub fn with_cipher(mut self, cipher: CredentialCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Add or replace the endpoint resolver for a provider name.
    pub fn register(&mut self, provider: impl Into<String>, f: ResolveFn) {
        self.table.insert(provider.into(), f);
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `agent_name` for `tenant`.
    ///
    /// `requested` names a capability the turn needs (for example image
    /// generation); when the agent lacks it and declares a reroute, the
    /// reroute target is resolved instead. Reroutes are a single hop.
    pub fn resolve(
        &self,
        agent_name: &str,
        tenant: &TenantConfig,
        requested: Option<Capability>,
    ) -> Result<ProviderHandle> {
        let mut agent = self.lookup(agent_name)?;
        let mut resolved_name = agent_name;
        let mut rerouted_from = None;

        if let Some(cap) = requested {
            if let Some(target) = agent.reroute_for(cap) {
                agent = self.lookup(target)?;
                rerouted_from = Some(agent_name.to_string());
                resolved_name = target;
            }
        }

        let endpoint = self.endpoint_for(&agent.provider, agent)?;
        let (provider, endpoint, credential, source, via_aggregator) =
            self.pick_credential(agent, endpoint, tenant)?;

        let handle = ProviderHandle {
            agent_name: resolved_name.to_string(),
            provider,
            wire: endpoint.wire,
            base_url: endpoint.base_url,
            model_id: endpoint.model_id,
            credential,
            credential_source: source,
            via_aggregator,
            rerouted_from,
            capabilities: agent.capabilities,
            max_prompt_tokens: agent.max_prompt_tokens,
            max_output_tokens: agent.max_output_tokens,
            temperature: agent.temperature,
        };

        TraceEvent::ProviderResolved {
            agent: handle.agent_name.clone(),
            provider: handle.provider.clone(),
            model: handle.model_id.clone(),
            credential_source: handle.credential_source.as_str().into(),
            rerouted: handle.rerouted_from.is_some(),
        }
        .emit();

        Ok(handle)
    }

    fn lookup(&self, name: &str) -> Result<&AgentConfig> {
        self.agents
            .get(name)
            .ok_or_else(|| Error::Validation(format!("unknown agent '{name}'")))
    }

    fn endpoint_for(&self, provider: &str, agent: &AgentConfig) -> Result<Endpoint> {
        let f = self
            .table
            .get(provider)
            .ok_or_else(|| Error::Config(format!("no resolver registered for provider '{provider}'")))?;
        Ok(f(agent))
    }

    fn tenant_key(&self, tenant: &TenantConfig, provider: &str) -> Option<String> {
        tenant
            .credentials
            .get(provider)
            .map(|v| decrypt_or_plain(self.cipher.as_ref(), v))
            .filter(|k| !k.is_empty())
    }

    fn shared_key(&self, tenant: &TenantConfig, provider: &str) -> Option<String> {
        if tenant.tier == Tier::Paid {
            return None;
        }
        self.shared_keys
            .get(provider)
            .map(|v| decrypt_or_plain(self.cipher.as_ref(), v))
            .filter(|k| !k.is_empty())
    }

    #[allow(clippy::type_complexity)]
    fn pick_credential(
        &self,
        agent: &AgentConfig,
        endpoint: Endpoint,
        tenant: &TenantConfig,
    ) -> Result<(String, Endpoint, Credential, CredentialSource, bool)> {
        let provider = agent.provider.as_str();

        // 1. Tenant's own key for the provider.
        if let Some(key) = self.tenant_key(tenant, provider) {
            return Ok((
                provider.to_string(),
                endpoint,
                Credential::new(key),
                CredentialSource::TenantKey,
                false,
            ));
        }

        // 2. Platform key, free tier only.
        if let Some(key) = self.shared_key(tenant, provider) {
            return Ok((
                provider.to_string(),
                endpoint,
                Credential::new(key),
                CredentialSource::SharedKey,
                false,
            ));
        }

        // 3. Aggregation provider.
        let agg = self.aggregator.provider.as_str();
        if self.aggregator.enabled && provider != agg {
            let agg_key = tenant
                .aggregator_key
                .as_deref()
                .map(|v| decrypt_or_plain(self.cipher.as_ref(), v))
                .filter(|k| !k.is_empty())
                .map(|k| (k, CredentialSource::TenantKey))
                .or_else(|| {
                    self.tenant_key(tenant, agg)
                        .map(|k| (k, CredentialSource::TenantKey))
                })
                .or_else(|| {
                    self.shared_key(tenant, agg)
                        .map(|k| (k, CredentialSource::SharedKey))
                });

            if let Some((key, source)) = agg_key {
                let mut agg_endpoint = self.endpoint_for(agg, agent)?;
                // The agent's own base_url points at the original provider.
                if agent.base_url.is_some() {
                    let plain = AgentConfig {
                        base_url: None,
                        ..agent.clone()
                    };
                    agg_endpoint = self.endpoint_for(agg, &plain)?;
                }
                agg_endpoint.model_id = agent.aggregator_model_id();
                return Ok((agg.to_string(), agg_endpoint, Credential::new(key), source, true));
            }
        }

        // 4. Degraded: callable shape, no credential.
        tracing::warn!(
            tenant = %tenant.tenant_id,
            provider = %provider,
            "no credential available; returning degraded handle"
        );
        Ok((
            provider.to_string(),
            endpoint,
            Credential::empty(),
            CredentialSource::None,
            false,
        ))
    }
}
