//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use cg_domain::config::{Config, ConfigSeverity};
use cg_memory::create_store;
use cg_providers::{HttpProviderFactory, ProviderResolver};

use crate::api::auth::hash_token;
use crate::collab::{
    BroadcastNotifier, HeaderIdentityResolver, InMemoryThreadStore, TenantDirectory,
    TierRateLimiter,
};
use crate::runtime::{Orchestrator, OrchestratorDeps, ToolRegistry};
use crate::state::AppState;

const NOTIFY_CAPACITY: usize = 1024;
const PROVIDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Memory store ─────────────────────────────────────────────────
    let memory = create_store(&config.memory).context("creating memory store")?;
    tracing::info!(backend = ?config.memory.backend, "memory store ready");

    // ── Providers ────────────────────────────────────────────────────
    let resolver = Arc::new(
        ProviderResolver::from_config(&config).context("initializing provider resolver")?,
    );
    let factory = Arc::new(
        HttpProviderFactory::new(PROVIDER_CONNECT_TIMEOUT)
            .context("building provider HTTP client")?,
    );
    if config.agents.is_empty() {
        tracing::warn!("no agents configured; every turn will fail to resolve a provider");
    } else {
        tracing::info!(agent_count = config.agents.len(), "agents configured");
    }

    // ── Collaborators ────────────────────────────────────────────────
    let threads = Arc::new(InMemoryThreadStore::new());
    let tenants = TenantDirectory::new(&config.tenants);
    tracing::info!(tenant_count = tenants.len(), "tenant directory loaded");
    let limiter = Arc::new(TierRateLimiter::new(config.limits.clone()));
    let notifier = Arc::new(BroadcastNotifier::new(NOTIFY_CAPACITY));
    let tools = ToolRegistry::with_builtins(Arc::clone(&memory));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        OrchestratorDeps {
            threads,
            tenants,
            limiter,
            notifier: notifier.clone(),
            memory,
            resolver,
            factory,
            tools,
        },
    ));

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().and_then(|t| hash_token(&t)) {
            Some(hash) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(hash)
            }
            None => {
                tracing::warn!(
                    "API bearer-token auth DISABLED; set the {env_var} env var to require a token"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        orchestrator,
        identity: Arc::new(HeaderIdentityResolver),
        notifier,
        api_token_hash,
        shutdown: tokio_util::sync::CancellationToken::new(),
    })
}

/// Spawn long-running background loops.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Abandoned stream sweeper ─────────────────────────────────────
    let streaming = &state.config.streaming;
    let every = Duration::from_secs(streaming.sweep_interval_secs.max(1));
    let max_idle = Duration::from_secs(streaming.abandon_after_secs);
    Arc::clone(state.orchestrator.sessions()).spawn_sweeper(
        every,
        max_idle,
        state.shutdown.clone(),
    );
    tracing::info!(
        every_secs = every.as_secs(),
        abandon_after_secs = max_idle.as_secs(),
        "stream session sweeper started"
    );
}
