mod agents;
mod context;
mod limits;
mod memory;
mod observability;
mod platform;
mod server;
mod streaming;

pub use agents::*;
pub use context::*;
pub use limits::*;
pub use memory::*;
pub use observability::*;
pub use platform::*;
pub use server::*;
pub use streaming::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::tenant::TenantConfig;

/// Upper bound on `streaming.provider_attempts`.
pub const MAX_PROVIDER_ATTEMPTS: u32 = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Logical agents (key = agent name, e.g. "claude").
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// Agent used when a thread does not name one.
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Static tenant directory.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: String, message: &str| {
            errors.push(ConfigError {
                severity,
                field,
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port".into(), "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            push(ConfigSeverity::Error, "server.host".into(), "host must not be empty");
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            push(
                ConfigSeverity::Warning,
                "server.cors.allowed_origins".into(),
                "wildcard \"*\" allows all origins (not recommended for production)",
            );
        }

        if self.agents.is_empty() {
            push(ConfigSeverity::Warning, "agents".into(), "no agents configured");
        }
        // Sorted so the report is stable.
        let mut names: Vec<&String> = self.agents.keys().collect();
        names.sort();
        for name in names {
            let agent = &self.agents[name];
            if agent.model.is_empty() {
                push(
                    ConfigSeverity::Error,
                    format!("agents.{name}.model"),
                    "model must not be empty",
                );
            }
            if agent.max_prompt_tokens == 0 {
                push(
                    ConfigSeverity::Error,
                    format!("agents.{name}.max_prompt_tokens"),
                    "prompt ceiling must be greater than 0",
                );
            }
            for (i, reroute) in agent.reroutes.iter().enumerate() {
                if !self.agents.contains_key(&reroute.agent) {
                    push(
                        ConfigSeverity::Error,
                        format!("agents.{name}.reroutes[{i}].agent"),
                        "reroute target is not a configured agent",
                    );
                }
            }
        }
        if let Some(ref default) = self.default_agent {
            if !self.agents.contains_key(default) {
                push(
                    ConfigSeverity::Error,
                    "default_agent".into(),
                    "default agent is not a configured agent",
                );
            }
        }

        if self.memory.backend == MemoryBackend::Rest && self.memory.base_url.is_empty() {
            push(
                ConfigSeverity::Error,
                "memory.base_url".into(),
                "base_url must not be empty for the rest backend",
            );
        }
        if self.memory.min_page_size > self.memory.max_page_size {
            push(
                ConfigSeverity::Warning,
                "memory.min_page_size".into(),
                "min_page_size exceeds max_page_size; max wins",
            );
        }

        let sample_rate = self.observability.sample_rate;
        if !(0.0..=1.0).contains(&sample_rate) {
            push(
                ConfigSeverity::Warning,
                "observability.sample_rate".into(),
                "sample rate outside 0.0..=1.0 is clamped",
            );
        }

        if self.streaming.chunk_channel_capacity == 0 {
            push(
                ConfigSeverity::Error,
                "streaming.chunk_channel_capacity".into(),
                "channel capacity must be greater than 0",
            );
        }
        if self.streaming.provider_attempts == 0 {
            push(
                ConfigSeverity::Error,
                "streaming.provider_attempts".into(),
                "at least one provider attempt is required",
            );
        } else if self.streaming.provider_attempts > MAX_PROVIDER_ATTEMPTS {
            push(
                ConfigSeverity::Error,
                "streaming.provider_attempts".into(),
                &format!("at most {MAX_PROVIDER_ATTEMPTS} provider attempts are allowed"),
            );
        }

        let mut seen = HashSet::new();
        for (i, tenant) in self.tenants.iter().enumerate() {
            if !seen.insert(tenant.tenant_id.as_str()) {
                push(
                    ConfigSeverity::Error,
                    format!("tenants[{i}].tenant_id"),
                    "duplicate tenant id",
                );
            }
        }

        errors
    }
}
