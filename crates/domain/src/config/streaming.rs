use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Capacity of the per-session chunk channel.
    #[serde(default = "d_64")]
    pub chunk_channel_capacity: usize,
    /// Minimum delay between two notifications of the same session.
    #[serde(default = "d_15")]
    pub min_chunk_interval_ms: u64,
    /// Sessions with no provider activity for this long are cancelled by
    /// the sweeper.
    #[serde(default = "d_600")]
    pub abandon_after_secs: u64,
    #[serde(default = "d_60")]
    pub sweep_interval_secs: u64,
    /// Attempts per provider call (first try included).
    #[serde(default = "d_3")]
    pub provider_attempts: u32,
    /// Tool execution rounds before the model must answer.
    #[serde(default = "d_3")]
    pub max_tool_rounds: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_channel_capacity: 64,
            min_chunk_interval_ms: 15,
            abandon_after_secs: 600,
            sweep_interval_secs: 60,
            provider_attempts: 3,
            max_tool_rounds: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background enrichment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Enrichment runs allowed per thread per hour.
    #[serde(default = "d_1")]
    pub max_runs_per_thread_per_hour: u32,
    /// Threads shorter than this are not summarized.
    #[serde(default = "d_6")]
    pub min_messages: usize,
    /// Agent used for summarization; defaults to the thread's agent.
    #[serde(default)]
    pub agent: Option<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_runs_per_thread_per_hour: 1,
            min_messages: 6,
            agent: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_64() -> usize {
    64
}
fn d_15() -> u64 {
    15
}
fn d_600() -> u64 {
    600
}
fn d_60() -> u64 {
    60
}
fn d_3() -> u32 {
    3
}
fn d_1() -> u32 {
    1
}
fn d_6() -> usize {
    6
}
fn d_true() -> bool {
    true
}
