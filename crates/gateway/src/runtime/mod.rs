//! Conversation streaming orchestrator.
//!
//! [`Orchestrator::start_turn`] validates a request, persists the user
//! message, registers a stream session and spawns the turn loop (see
//! `turn.rs`). The caller receives a channel of [`TurnEvent`]s suitable
//! for SSE or for draining into one JSON response.

pub mod enrichment;
pub mod events;
pub mod forward;
pub mod post;
pub mod reconcile;
pub mod sessions;
pub mod tools;
mod turn;

pub use events::TurnEvent;
pub use sessions::{SessionInfo, SessionState, StreamSessionRegistry};
pub use tools::{Tool, ToolContext, ToolRegistry};

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::Instrument;

use cg_domain::capability::Capability;
use cg_domain::config::Config;
use cg_domain::conversation::{Attachment, ConversationMessage};
use cg_domain::error::{Error, Result};
use cg_domain::tenant::Identity;
use cg_domain::tool::Role;
use cg_memory::{MemoryComposer, MemoryStore};
use cg_providers::{ProviderFactory, ProviderHandle, ProviderResolver};

use crate::collab::{Notifier, RateLimiter, TenantDirectory, ThreadStore};

use enrichment::Enricher;
use post::PostCompletion;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canonical turn request, whatever the wire encoding was.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    pub thread_id: String,
    #[serde(default)]
    pub content: String,
    /// Answer an already persisted user message instead of creating one.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Agent override; defaults to the thread's agent.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    /// Capability the turn needs beyond its attachments, e.g.
    /// `image_generation`.
    #[serde(default)]
    pub capability: Option<Capability>,
}

pub struct TurnHandle {
    pub session_id: String,
    pub events: mpsc::Receiver<TurnEvent>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collaborators the orchestrator is built from.
pub struct OrchestratorDeps {
    pub threads: Arc<dyn ThreadStore>,
    pub tenants: TenantDirectory,
    pub limiter: Arc<dyn RateLimiter>,
    pub notifier: Arc<dyn Notifier>,
    pub memory: Arc<dyn MemoryStore>,
    pub resolver: Arc<ProviderResolver>,
    pub factory: Arc<dyn ProviderFactory>,
    pub tools: ToolRegistry,
}

pub struct Orchestrator {
    config: Arc<Config>,
    threads: Arc<dyn ThreadStore>,
    tenants: TenantDirectory,
    limiter: Arc<dyn RateLimiter>,
    notifier: Arc<dyn Notifier>,
    composer: MemoryComposer,
    resolver: Arc<ProviderResolver>,
    factory: Arc<dyn ProviderFactory>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<StreamSessionRegistry>,
    post: PostCompletion,
}

/// Validated inputs of one spawned turn.
#[derive(Debug, Clone)]
pub(crate) struct TurnContext {
    pub session_id: String,
    pub identity: Identity,
    pub principal: String,
    pub thread: cg_domain::conversation::Thread,
    pub tenant: cg_domain::tenant::TenantConfig,
    pub handle: ProviderHandle,
    pub user_message: ConversationMessage,
    pub app_id: Option<String>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, deps: OrchestratorDeps) -> Self {
        let enricher = Arc::new(Enricher::new(
            config.enrichment.clone(),
            config.streaming.provider_attempts,
            Arc::clone(&deps.threads),
            Arc::clone(&deps.memory),
            Arc::clone(&deps.resolver),
            Arc::clone(&deps.factory),
        ));
        let post = PostCompletion::new(
            Arc::clone(&deps.memory),
            Arc::clone(&deps.limiter),
            enricher,
        );
        Self {
            threads: deps.threads,
            tenants: deps.tenants,
            limiter: deps.limiter,
            notifier: deps.notifier,
            composer: MemoryComposer::new(deps.memory),
            resolver: deps.resolver,
            factory: deps.factory,
            tools: Arc::new(deps.tools),
            sessions: Arc::new(StreamSessionRegistry::new()),
            post,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<StreamSessionRegistry> {
        &self.sessions
    }

    pub fn threads(&self) -> &Arc<dyn ThreadStore> {
        &self.threads
    }

    /// Validate, persist the user message and start streaming.
    ///
    /// Every rejection happens here, before any model work: anonymous
    /// callers (401), unknown threads (404), foreign threads (403), empty
    /// input (400), rate limits (429) and unsupported attachments (400).
    pub async fn start_turn(
        self: &Arc<Self>,
        identity: &Identity,
        req: TurnRequest,
    ) -> Result<TurnHandle> {
        let principal = identity
            .principal()
            .ok_or_else(|| Error::Unauthorized("sign in or start a guest session".into()))?
            .to_owned();
        if req.thread_id.trim().is_empty() {
            return Err(Error::Validation("thread_id is required".into()));
        }

        let thread = self
            .threads
            .get_thread(&req.thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {} not found", req.thread_id)))?;
        if thread.owner != principal {
            return Err(Error::Forbidden("thread belongs to another user".into()));
        }

        let existing = match req.message_id.as_deref() {
            Some(id) => {
                let msg = self
                    .threads
                    .get_message(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("message {id} not found")))?;
                if msg.thread_id != thread.id || msg.role != Role::User {
                    return Err(Error::Validation(
                        "message_id must reference a user message of this thread".into(),
                    ));
                }
                Some(msg)
            }
            None => {
                if req.content.trim().is_empty() && req.attachments.is_empty() {
                    return Err(Error::Validation("message content is empty".into()));
                }
                None
            }
        };

        let tenant = self.tenants.get(&thread.tenant_id);
        self.limiter.check(identity, &tenant).await?;

        let agent_name = req
            .agent
            .clone()
            .or_else(|| Some(thread.agent.clone()).filter(|a| !a.is_empty()))
            .or_else(|| self.config.default_agent.clone())
            .ok_or_else(|| Error::Validation("no agent configured for this thread".into()))?;
        let attachments = existing
            .as_ref()
            .map(|m| m.attachments.as_slice())
            .unwrap_or(req.attachments.as_slice());
        let needed = self.needed_capability(&agent_name, req.capability, attachments);
        let handle = self.resolver.resolve(&agent_name, &tenant, needed)?;
        check_capabilities(&handle, req.capability, attachments)?;

        let user_message = match existing {
            Some(msg) => msg,
            None => {
                let mut msg = ConversationMessage::new(&thread.id, Role::User, req.content);
                msg.attachments = req.attachments;
                self.threads.create_message(msg).await?
            }
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.sessions.register(&session_id, &principal, &thread.id)?;
        let (tx, rx) = mpsc::channel(self.config.streaming.chunk_channel_capacity.max(4));
        // Fresh channel with spare capacity; this cannot fail.
        let _ = tx.try_send(TurnEvent::SessionStarted {
            session_id: session_id.clone(),
            thread_id: thread.id.clone(),
            agent: handle.agent_name.clone(),
            model: handle.model_id.clone(),
        });

        let span = tracing::info_span!(
            "turn",
            session_id = %session_id,
            thread_id = %thread.id,
            agent = %handle.agent_name,
            provider = %handle.provider,
            "otel.kind" = "SERVER",
        );
        let ctx = TurnContext {
            session_id: session_id.clone(),
            identity: identity.clone(),
            principal,
            app_id: req.app_id.or_else(|| thread.app_id.clone()),
            thread,
            tenant,
            handle,
            user_message,
        };
        tokio::spawn(turn::run(Arc::clone(self), ctx, cancel, tx).instrument(span));

        Ok(TurnHandle {
            session_id,
            events: rx,
        })
    }

    /// Stop a live session owned by the caller.
    pub fn stop(&self, identity: &Identity, session_id: &str) -> Result<()> {
        let principal = identity
            .principal()
            .ok_or_else(|| Error::Unauthorized("no caller identity".into()))?;
        self.sessions.cancel(session_id, principal)
    }

    pub fn live_sessions(&self, identity: &Identity) -> Result<Vec<SessionInfo>> {
        let principal = identity
            .principal()
            .ok_or_else(|| Error::Unauthorized("no caller identity".into()))?;
        Ok(self.sessions.list(principal))
    }

    /// The capability to reroute on: the explicit one, else the first
    /// attachment kind the agent cannot take.
    fn needed_capability(
        &self,
        agent_name: &str,
        requested: Option<Capability>,
        attachments: &[Attachment],
    ) -> Option<Capability> {
        if requested.is_some() {
            return requested;
        }
        let agent = self.resolver.agent(agent_name)?;
        attachments
            .iter()
            .map(Attachment::capability)
            .find(|cap| !agent.capabilities.supports(*cap))
    }
}

fn check_capabilities(
    handle: &ProviderHandle,
    requested: Option<Capability>,
    attachments: &[Attachment],
) -> Result<()> {
    if let Some(cap) = requested {
        if !handle.capabilities.supports(cap) {
            return Err(Error::Validation(format!(
                "agent {} does not support {}",
                handle.agent_name,
                cap.as_str()
            )));
        }
    }
    for att in attachments {
        let cap = att.capability();
        if !handle.capabilities.supports(cap) {
            return Err(Error::Validation(format!(
                "agent {} does not accept {} attachments ({})",
                handle.agent_name,
                cap.as_str(),
                att.name
            )));
        }
    }
    Ok(())
}
