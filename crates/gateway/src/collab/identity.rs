use async_trait::async_trait;
use axum::http::HeaderMap;

use cg_domain::tenant::Identity;

/// Resolves the caller behind a request. An anonymous result is rejected
/// with 401 by the orchestrator.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Identity;
}

/// Reads `x-member-id` / `x-guest-id` set by the upstream auth proxy.
/// A member id wins when both are present.
pub struct HeaderIdentityResolver;

pub const MEMBER_HEADER: &str = "x-member-id";
pub const GUEST_HEADER: &str = "x-guest-id";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl IdentityResolver for HeaderIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Identity {
        match header(headers, MEMBER_HEADER) {
            Some(member) => Identity::member(member),
            None => Identity {
                member: None,
                guest: header(headers, GUEST_HEADER),
            },
        }
    }
}
