use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared (platform) credentials
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Platform-owned provider keys, used for tenants that bring none.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    /// Keyed by provider name.
    #[serde(default)]
    pub credentials: HashMap<String, AuthConfig>,
}

/// Where to find a key. Precedence: `key`, keychain, `env`,
/// then `{SERVICE}_{ACCOUNT}` as an env var.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name (e.g., "convogate").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g., "openai-api-key").
    #[serde(default)]
    pub account: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Provider name of the aggregator.
    #[serde(default = "d_openrouter")]
    pub provider: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: d_openrouter(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential encryption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Env var holding the hex-encoded 32-byte key that decrypts
    /// `enc:`-prefixed tenant credentials.
    #[serde(default = "d_credential_key_env")]
    pub credential_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            credential_key_env: d_credential_key_env(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_openrouter() -> String {
    "openrouter".into()
}
fn d_credential_key_env() -> String {
    "CG_CREDENTIAL_KEY".into()
}
