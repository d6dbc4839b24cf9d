//! End-to-end resolution scenarios against a config parsed from TOML.

use cg_domain::capability::Capability;
use cg_domain::config::Config;
use cg_domain::error::Error;
use cg_domain::tenant::{TenantConfig, Tier};
use cg_providers::{
    ChatRequest, CredentialSource, HttpProviderFactory, ProviderFactory, ProviderResolver,
};

const CONFIG: &str = r#"
[agents.claude]
provider = "anthropic"
model = "claude-sonnet-4"

[agents.reasoner]
provider = "deepseek"
model = "deepseek-reasoner"
[[agents.reasoner.reroutes]]
capability = "image_generation"
agent = "painter"

[agents.painter]
provider = "openai"
model = "gpt-image-1"
capabilities = { text = true, image = true, image_generation = true }

[platform.credentials.anthropic]
key = "sk-shared-anthropic"

[platform.credentials.openai]
key = "sk-shared-openai"
"#;

fn resolver(config: &str) -> ProviderResolver {
    let cfg: Config = toml::from_str(config).unwrap();
    ProviderResolver::from_config(&cfg).unwrap()
}

fn paid(id: &str) -> TenantConfig {
    TenantConfig { tier: Tier::Paid, ..TenantConfig::anonymous(id) }
}

#[test]
fn paid_tenant_never_gets_shared_key() {
    let r = resolver(CONFIG);
    let h = r.resolve("claude", &paid("acme"), None).unwrap();
    assert_eq!(h.credential_source, CredentialSource::None);
    assert!(h.credential.is_empty());
    assert!(!h.via_aggregator);
}

#[test]
fn free_tenant_gets_shared_key() {
    let r = resolver(CONFIG);
    let h = r.resolve("claude", &TenantConfig::anonymous("hobby"), None).unwrap();
    assert_eq!(h.credential_source, CredentialSource::SharedKey);
    assert_eq!(h.credential.expose(), "sk-shared-anthropic");
}

#[test]
fn paid_tenant_with_aggregator_key_goes_through_aggregator() {
    let r = resolver(CONFIG);
    let mut t = paid("acme");
    t.aggregator_key = Some("sk-or-tenant".into());
    let h = r.resolve("claude", &t, None).unwrap();
    assert!(h.via_aggregator);
    assert_eq!(h.credential_source, CredentialSource::TenantKey);
    assert_eq!(h.model_id, "anthropic/claude-sonnet-4");
    assert_eq!(h.base_url, "https://openrouter.ai/api/v1");
}

#[test]
fn composite_agent_reroutes_for_image_generation() {
    let r = resolver(CONFIG);
    let t = TenantConfig::anonymous("hobby");
    let h = r.resolve("reasoner", &t, Some(Capability::ImageGeneration)).unwrap();
    assert_eq!(h.agent_name, "painter");
    assert_eq!(h.rerouted_from.as_deref(), Some("reasoner"));
    assert_eq!(h.provider, "openai");

    let plain = r.resolve("reasoner", &t, Some(Capability::Text)).unwrap();
    assert_eq!(plain.agent_name, "reasoner");
    assert!(plain.rerouted_from.is_none());
}

#[test]
fn resolution_is_deterministic() {
    let r = resolver(CONFIG);
    let t = TenantConfig::anonymous("hobby");
    let first = r.resolve("claude", &t, None).unwrap();
    for _ in 0..10 {
        assert_eq!(r.resolve("claude", &t, None).unwrap(), first);
    }
}

#[tokio::test]
async fn degraded_handle_fails_with_provider_error_and_no_secret() {
    let r = resolver(CONFIG);
    let h = r.resolve("claude", &paid("acme"), None).unwrap();
    let factory = HttpProviderFactory::new(std::time::Duration::from_secs(5)).unwrap();
    let provider = factory.build(&h).unwrap();

    let err = provider.chat(&ChatRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::Provider { .. }));
    assert_eq!(err.status(), 500);
    assert!(!err.public_message().contains("sk-"));
}
