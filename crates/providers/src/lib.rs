pub mod anthropic;
pub mod credentials;
pub mod factory;
pub mod handle;
pub mod openai_compat;
pub mod resolver;
pub mod retry;
mod sse;
pub mod traits;

pub use credentials::CredentialCipher;
pub use factory::{HttpProviderFactory, ProviderFactory};
pub use handle::{Credential, CredentialSource, ProviderHandle, WireFormat};
pub use resolver::ProviderResolver;
pub use retry::with_retry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
