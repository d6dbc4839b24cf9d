//! Per-tier request and credit limits.
//!
//! [`TierRateLimiter`] keeps two in-memory counters: requests per
//! principal over a rolling hour, and tokens per tenant per UTC day. The
//! daily counter resets when the date rolls over.
//!
//! [`HourlyWindows`] is the rolling-hour counter on its own; enrichment
//! uses it to cap runs per thread.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};

use cg_domain::config::LimitsConfig;
use cg_domain::error::{Error, Result};
use cg_domain::tenant::{Identity, TenantConfig};

/// Outcome of a successful check. `remaining` is the number of requests
/// left this hour, `None` when uncapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub remaining: Option<u32>,
}

/// Admission control consulted before any model work starts.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Admit one request or fail with [`Error::Quota`]. An admitted
    /// request counts against the hourly window.
    async fn check(&self, identity: &Identity, tenant: &TenantConfig) -> Result<RateDecision>;

    /// Charge completed usage to the tenant's daily credit.
    async fn record_usage(&self, tenant_id: &str, tokens: u64);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rolling hour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keys without a hit in the last hour are dropped at most this often.
const IDLE_SWEEP_EVERY_MINUTES: i64 = 5;

/// Per-key hit timestamps over a rolling hour.
///
/// Keys whose window has emptied are removed, so memory is bounded by
/// the keys active in the last hour.
#[derive(Debug, Default)]
pub struct HourlyWindows {
    hits: HashMap<String, VecDeque<DateTime<Utc>>>,
    last_sweep: Option<DateTime<Utc>>,
}

impl HourlyWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one hit for `key` at `now` unless `cap` hits already fall
    /// within the hour. `Ok` carries the count including this hit; `Err`
    /// carries the oldest hit still counted.
    pub fn hit(
        &mut self,
        key: &str,
        now: DateTime<Utc>,
        cap: Option<u32>,
    ) -> std::result::Result<u32, DateTime<Utc>> {
        self.sweep_idle(now);
        let cutoff = now - Duration::hours(1);
        let window = self.hits.entry(key.to_owned()).or_default();
        prune(window, cutoff);
        if let Some(cap) = cap {
            if window.len() as u32 >= cap {
                let oldest = window.front().copied().unwrap_or(now);
                let empty = window.is_empty();
                if empty {
                    self.hits.remove(key);
                }
                return Err(oldest);
            }
        }
        window.push_back(now);
        Ok(window.len() as u32)
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.hits.len()
    }

    fn sweep_idle(&mut self, now: DateTime<Utc>) {
        let due = self
            .last_sweep
            .map_or(true, |t| now - t >= Duration::minutes(IDLE_SWEEP_EVERY_MINUTES));
        if !due {
            return;
        }
        self.last_sweep = Some(now);
        let cutoff = now - Duration::hours(1);
        self.hits.retain(|_, window| {
            prune(window, cutoff);
            !window.is_empty()
        });
    }
}

fn prune(window: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while window.front().is_some_and(|t| *t <= cutoff) {
        window.pop_front();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tier limiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DailyTokens {
    date: NaiveDate,
    tokens: u64,
}

pub struct TierRateLimiter {
    limits: LimitsConfig,
    requests: Mutex<HourlyWindows>,
    tokens: RwLock<HashMap<String, DailyTokens>>,
}

impl TierRateLimiter {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            requests: Mutex::new(HourlyWindows::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Tokens charged to `tenant_id` today.
    pub fn tokens_today(&self, tenant_id: &str) -> u64 {
        let today = Utc::now().date_naive();
        match self.tokens.read().get(tenant_id) {
            Some(e) if e.date == today => e.tokens,
            _ => 0,
        }
    }

    fn check_at(
        &self,
        identity: &Identity,
        tenant: &TenantConfig,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let principal = identity
            .principal()
            .ok_or_else(|| Error::Unauthorized("no caller identity".into()))?;
        let limits = self.limits.for_tier(tenant.tier);

        if let Some(cap) = limits.daily_tokens {
            let used = match self.tokens.read().get(&tenant.tenant_id) {
                Some(e) if e.date == now.date_naive() => e.tokens,
                _ => 0,
            };
            if used >= cap {
                return Err(Error::Quota {
                    message: "daily credit exhausted".into(),
                    hint: "credits refill at midnight UTC; upgrade the plan for more".into(),
                });
            }
        }

        let cap = limits.hourly_requests;
        match self.requests.lock().hit(principal, now, cap) {
            Ok(count) => Ok(RateDecision {
                remaining: cap.map(|c| c.saturating_sub(count)),
            }),
            Err(oldest) => {
                let retry_in = (oldest + Duration::hours(1) - now).num_minutes().max(1);
                Err(Error::Quota {
                    message: "hourly request limit reached".into(),
                    hint: format!("try again in {retry_in} minutes"),
                })
            }
        }
    }

    /// Principals with requests in the last hour.
    pub fn tracked_principals(&self) -> usize {
        self.requests.lock().tracked()
    }
}

#[async_trait]
impl RateLimiter for TierRateLimiter {
    async fn check(&self, identity: &Identity, tenant: &TenantConfig) -> Result<RateDecision> {
        self.check_at(identity, tenant, Utc::now())
    }

    async fn record_usage(&self, tenant_id: &str, tokens: u64) {
        let today = Utc::now().date_naive();
        let mut usage = self.tokens.write();
        let entry = usage
            .entry(tenant_id.to_owned())
            .or_insert(DailyTokens { date: today, tokens: 0 });
        if entry.date != today {
            entry.date = today;
            entry.tokens = 0;
        }
        entry.tokens += tokens;
    }
}
