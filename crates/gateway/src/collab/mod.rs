//! Contracts the orchestrator consumes from the rest of the platform, with
//! process-local implementations.
//!
//! Persistence, identity, rate limiting and notification delivery are
//! owned by other services in production; the traits here are the only
//! surface the streaming core depends on.

pub mod identity;
pub mod notify;
pub mod rate_limit;
pub mod store;
pub mod tenants;

pub use identity::{HeaderIdentityResolver, IdentityResolver};
pub use notify::{BroadcastNotifier, NotifyEvent, Notifier};
pub use rate_limit::{RateDecision, RateLimiter, TierRateLimiter};
pub use store::{InMemoryThreadStore, ThreadStore, ThreadUpdate};
pub use tenants::TenantDirectory;
