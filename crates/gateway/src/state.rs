use std::sync::Arc;

use cg_domain::config::Config;
use tokio_util::sync::CancellationToken;

use crate::collab::{BroadcastNotifier, IdentityResolver};
use crate::runtime::Orchestrator;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Realtime fan-out; the transport that delivers to clients subscribes here.
    pub notifier: Arc<BroadcastNotifier>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` means no token is configured; all requests are allowed.
    pub api_token_hash: Option<Vec<u8>>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}
