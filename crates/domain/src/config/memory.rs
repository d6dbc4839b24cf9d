use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory & knowledge backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
    #[serde(default = "d_mem_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
    /// Page size for a brand-new thread.
    #[serde(default = "d_20")]
    pub max_page_size: usize,
    /// Floor for long threads.
    #[serde(default = "d_3u")]
    pub min_page_size: usize,
    /// Thread length at which the page size halves.
    #[serde(default = "d_10")]
    pub page_size_halving_messages: usize,
    /// Calendar look-ahead window.
    #[serde(default = "d_7")]
    pub calendar_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    /// Process-local store; for development and tests.
    #[default]
    InMemory,
    Rest,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::InMemory,
            base_url: d_mem_url(),
            api_key: None,
            timeout_ms: 8000,
            max_retries: 3,
            max_page_size: 20,
            min_page_size: 3,
            page_size_halving_messages: 10,
            calendar_days: 7,
        }
    }
}

impl MemoryConfig {
    /// Memories to inject for a thread that already has `thread_len`
    /// messages. Shrinks as the thread grows.
    pub fn page_size_for(&self, thread_len: usize) -> usize {
        let halving = self.page_size_halving_messages.max(1);
        let size = self.max_page_size * halving / (halving + thread_len);
        size.clamp(self.min_page_size.min(self.max_page_size), self.max_page_size)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_mem_url() -> String {
    "http://localhost:5000".into()
}
fn d_8000() -> u64 {
    8000
}
fn d_3() -> u32 {
    3
}
fn d_3u() -> usize {
    3
}
fn d_20() -> usize {
    20
}
fn d_10() -> usize {
    10
}
fn d_7() -> i64 {
    7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_shrinks_with_thread_length() {
        let cfg = MemoryConfig::default();
        assert_eq!(cfg.page_size_for(0), 20);
        assert_eq!(cfg.page_size_for(10), 10);
        assert_eq!(cfg.page_size_for(30), 5);
        assert_eq!(cfg.page_size_for(10_000), 3);
    }

    #[test]
    fn page_size_is_monotonic() {
        let cfg = MemoryConfig::default();
        let mut prev = usize::MAX;
        for len in 0..200 {
            let size = cfg.page_size_for(len);
            assert!(size <= prev);
            prev = size;
        }
    }
}
