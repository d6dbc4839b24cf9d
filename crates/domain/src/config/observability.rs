use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging & trace export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the gateway's logs and spans go.
///
/// Logs are always JSON on stdout, filtered by `RUST_LOG` or, when that
/// is unset, by `log_filter`. Turn spans (`session_id`, `thread_id`,
/// `agent`) and `trace_event` records are additionally exported over
/// OTLP/gRPC when `otlp_endpoint` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,

    /// OTLP collector, e.g. `http://localhost:4317`. Unset disables export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Share of turns whose spans are exported, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl ObservabilityConfig {
    /// `sample_rate` clamped into `0.0..=1.0`; NaN exports nothing.
    pub fn sample_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            0.0
        } else {
            self.sample_rate.clamp(0.0, 1.0)
        }
    }

    pub fn exports_traces(&self) -> bool {
        self.otlp_endpoint
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: d_log_filter(),
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_log_filter() -> String {
    "info,cg_gateway=debug".into()
}

fn d_service_name() -> String {
    "convogate".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_log_json_without_export() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.log_filter, "info,cg_gateway=debug");
        assert_eq!(cfg.service_name, "convogate");
        assert!(!cfg.exports_traces());
        assert_eq!(cfg.sample_ratio(), 1.0);
    }

    #[test]
    fn blank_endpoint_disables_export() {
        let cfg: ObservabilityConfig = toml::from_str(r#"otlp_endpoint = "  ""#).unwrap();
        assert!(!cfg.exports_traces());
    }

    #[test]
    fn sample_ratio_is_clamped() {
        let mut cfg = ObservabilityConfig {
            otlp_endpoint: Some("http://collector:4317".into()),
            sample_rate: 2.5,
            ..ObservabilityConfig::default()
        };
        assert!(cfg.exports_traces());
        assert_eq!(cfg.sample_ratio(), 1.0);
        cfg.sample_rate = -0.1;
        assert_eq!(cfg.sample_ratio(), 0.0);
        cfg.sample_rate = f64::NAN;
        assert_eq!(cfg.sample_ratio(), 0.0);
    }
}
