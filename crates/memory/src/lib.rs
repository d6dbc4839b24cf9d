//! `cg-memory`: memory & knowledge composition for ConvoGate.
//!
//! Provides the [`MemoryStore`] trait that abstracts over the memory
//! service, a production REST implementation ([`RestMemoryClient`]), a
//! process-local [`InMemoryStore`], and the [`MemoryComposer`] that turns
//! store reads into prompt-ready context.
//!
//! | `memory.backend` | Implementation      |
//! |------------------|---------------------|
//! | `in_memory`      | [`InMemoryStore`]   |
//! | `rest`           | [`RestMemoryClient`] |

pub mod composer;
pub mod in_memory;
pub mod provider;
pub mod rest;
pub mod types;

pub use composer::MemoryComposer;
pub use in_memory::InMemoryStore;
pub use provider::MemoryStore;
pub use rest::{from_reqwest, RestMemoryClient};
pub use types::{ComposeRequest, ComposedMemory, MemoryIngestRequest, MemoryScopeKey};

use std::sync::Arc;

use cg_domain::config::{MemoryBackend, MemoryConfig};
use cg_domain::error::Result;

/// Build the configured [`MemoryStore`].
pub fn create_store(cfg: &MemoryConfig) -> Result<Arc<dyn MemoryStore>> {
    match cfg.backend {
        MemoryBackend::InMemory => {
            tracing::info!("using in-memory memory store (not durable)");
            Ok(Arc::new(InMemoryStore::new()))
        }
        MemoryBackend::Rest => {
            let client = RestMemoryClient::new(cfg)?;
            tracing::info!(url = %cfg.base_url, "using REST memory store");
            Ok(Arc::new(client))
        }
    }
}
