use serde::{Deserialize, Serialize};

use crate::tenant::Tier;

/// Request and credit limits per tenant tier.
///
/// `None` leaves the corresponding dimension uncapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "d_free")]
    pub free: TierLimits,
    #[serde(default = "d_paid")]
    pub paid: TierLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    /// Requests per principal per rolling hour.
    #[serde(default)]
    pub hourly_requests: Option<u32>,
    /// Tokens (prompt + completion) per tenant per UTC day.
    #[serde(default)]
    pub daily_tokens: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free: d_free(),
            paid: d_paid(),
        }
    }
}

impl LimitsConfig {
    pub fn for_tier(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Paid => &self.paid,
        }
    }
}

fn d_free() -> TierLimits {
    TierLimits {
        hourly_requests: Some(30),
        daily_tokens: Some(200_000),
    }
}
fn d_paid() -> TierLimits {
    TierLimits {
        hourly_requests: Some(600),
        daily_tokens: None,
    }
}
