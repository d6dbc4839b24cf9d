use std::sync::Arc;
use std::time::Duration;

use cg_domain::error::Result;

use crate::anthropic::AnthropicProvider;
use crate::credentials::from_reqwest;
use crate::handle::{ProviderHandle, WireFormat};
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

/// Builds a callable adapter from a resolved handle.
///
/// The orchestrator depends on this trait rather than on HTTP adapters
/// directly so tests can script model output.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, handle: &ProviderHandle) -> Result<Arc<dyn LlmProvider>>;
}

/// Production factory sharing one connection pool across adapters.
pub struct HttpProviderFactory {
    client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("convogate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { client })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, handle: &ProviderHandle) -> Result<Arc<dyn LlmProvider>> {
        let provider: Arc<dyn LlmProvider> = match handle.wire {
            WireFormat::OpenaiCompat => {
                Arc::new(OpenAiCompatProvider::from_handle(handle, self.client.clone()))
            }
            WireFormat::Anthropic => {
                Arc::new(AnthropicProvider::from_handle(handle, self.client.clone()))
            }
        };
        Ok(provider)
    }
}
