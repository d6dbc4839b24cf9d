//! REST implementation of [`MemoryStore`].
//!
//! `RestMemoryClient` wraps a `reqwest::Client` and translates every
//! trait method into the corresponding HTTP call against the memory
//! service, with retry + exponential back-off on transient (5xx /
//! timeout) failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use cg_domain::config::MemoryConfig;
use cg_domain::error::{Error, Result};
use cg_domain::memory::{CalendarEvent, DocumentSnippet, KnowledgeEntry, MemoryItem};
use cg_domain::trace::TraceEvent;

use crate::provider::MemoryStore;
use crate::types::{
    CalendarResponse, DocumentSearchRequest, DocumentSearchResponse, KnowledgeResponse,
    MemoryIngestRequest, MemoryListResponse, ReinforceRequest, ReinforceResponse,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A REST-based client for the memory service.
///
/// Created once and reused for the lifetime of the gateway process.
/// The underlying `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct RestMemoryClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestMemoryClient {
    pub fn new(cfg: &MemoryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb
            .header("X-Client-Type", "convogate")
            .header("X-Trace-Id", uuid::Uuid::new_v4().to_string());
        match self.api_key {
            Some(ref key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json<T: DeserializeOwned>(endpoint: &str, resp: Response) -> Result<T> {
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Memory(format!("{endpoint}: failed to parse response: {e}")))
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry + exponential back-off.
    ///
    /// * Retries on 5xx status codes, timeouts and connection errors.
    /// * Does **not** retry on 4xx (client errors are permanent).
    /// * Emits a `TraceEvent::MemoryCall` after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    TraceEvent::MemoryCall {
                        endpoint: endpoint.to_owned(),
                        status: status.as_u16(),
                        duration_ms,
                    }
                    .emit();

                    if status.is_server_error() {
                        last_err = Some(Error::Memory(format!("{endpoint} returned {status}")));
                        continue;
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(Error::Auth(format!("{endpoint} auth failed ({status})")));
                    }
                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::Memory(format!("{endpoint} returned {status}: {body}")));
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    TraceEvent::MemoryCall {
                        endpoint: endpoint.to_owned(),
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        duration_ms,
                    }
                    .emit();
                    last_err = Some(from_reqwest(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Memory(format!("{endpoint}: all retries exhausted"))))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl MemoryStore for RestMemoryClient {
    async fn personal_memories(
        &self,
        principal: &str,
        exclude_thread_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        let url = self.url("/api/memories");
        let endpoint = "GET /api/memories";
        let limit = limit.to_string();
        let resp = self
            .execute_with_retry(endpoint, || {
                self.http.get(&url).query(&[
                    ("principal", principal),
                    ("exclude_thread", exclude_thread_id),
                    ("limit", limit.as_str()),
                ])
            })
            .await?;
        Ok(Self::json::<MemoryListResponse>(endpoint, resp).await?.memories)
    }

    async fn app_memories(&self, app_id: &str, limit: usize) -> Result<Vec<MemoryItem>> {
        let url = self.url(&format!("/api/apps/{app_id}/memories"));
        let endpoint = "GET /api/apps/{app}/memories";
        let resp = self
            .execute_with_retry(endpoint, || {
                self.http.get(&url).query(&[("limit", limit)])
            })
            .await?;
        Ok(Self::json::<MemoryListResponse>(endpoint, resp).await?.memories)
    }

    async fn search_documents(&self, req: DocumentSearchRequest) -> Result<Vec<DocumentSnippet>> {
        let url = self.url("/api/documents/search");
        let endpoint = "POST /api/documents/search";
        let resp = self
            .execute_with_retry(endpoint, || self.http.post(&url).json(&req))
            .await?;
        Ok(Self::json::<DocumentSearchResponse>(endpoint, resp).await?.snippets)
    }

    async fn calendar_events(
        &self,
        principal: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let url = self.url("/api/calendar");
        let endpoint = "GET /api/calendar";
        let (from, to) = (from.to_rfc3339(), to.to_rfc3339());
        let resp = self
            .execute_with_retry(endpoint, || {
                self.http.get(&url).query(&[
                    ("principal", principal),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                ])
            })
            .await?;
        Ok(Self::json::<CalendarResponse>(endpoint, resp).await?.events)
    }

    async fn app_knowledge(&self, app_id: &str) -> Result<Vec<KnowledgeEntry>> {
        let url = self.url(&format!("/api/apps/{app_id}/knowledge"));
        let endpoint = "GET /api/apps/{app}/knowledge";
        let resp = self.execute_with_retry(endpoint, || self.http.get(&url)).await?;
        Ok(Self::json::<KnowledgeResponse>(endpoint, resp).await?.entries)
    }

    async fn reinforce(&self, reinforcement_key: &str, ids: &[String]) -> Result<usize> {
        let url = self.url("/api/memories/reinforce");
        let endpoint = "POST /api/memories/reinforce";
        let body = ReinforceRequest { ids: ids.to_vec() };
        // The server dedupes on the key, which makes our own retries safe.
        let resp = self
            .execute_with_retry(endpoint, || {
                self.http
                    .post(&url)
                    .header("Idempotency-Key", reinforcement_key)
                    .json(&body)
            })
            .await?;
        Ok(Self::json::<ReinforceResponse>(endpoint, resp).await?.reinforced)
    }

    async fn ingest(&self, req: MemoryIngestRequest) -> Result<MemoryItem> {
        let url = self.url("/api/memories");
        let endpoint = "POST /api/memories";
        let resp = self
            .execute_with_retry(endpoint, || self.http.post(&url).json(&req))
            .await?;
        Self::json(endpoint, resp).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error conversion helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a `reqwest::Error` into a domain `Error`.
///
/// Timeout errors become `Error::Timeout`; everything else becomes
/// `Error::Http`.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
