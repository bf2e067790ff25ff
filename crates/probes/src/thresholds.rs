//! Per-run threshold overrides
//!
//! Clients override probe pass criteria through a nested map keyed by test
//! name. Each probe pulls its own keys with a typed getter and a documented
//! default.

use voiceci_core::ThresholdOverrides;

/// Resolved view over the per-run override map.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    overrides: ThresholdOverrides,
}

impl Thresholds {
    pub fn new(overrides: Option<ThresholdOverrides>) -> Self {
        Self {
            overrides: overrides.unwrap_or_default(),
        }
    }

    pub fn number(&self, test: &str, key: &str, default: f64) -> f64 {
        self.overrides
            .get(test)
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }

    pub fn integer(&self, test: &str, key: &str, default: u64) -> u64 {
        self.overrides
            .get(test)
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }

    /// True when the caller overrode this key.
    pub fn is_overridden(&self, test: &str, key: &str) -> bool {
        self.overrides
            .get(test)
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn overrides_win_over_defaults() {
        let mut ttfb = BTreeMap::new();
        ttfb.insert("p95_threshold_ms".to_string(), serde_json::json!(1500));
        let mut map = ThresholdOverrides::new();
        map.insert("ttfb".to_string(), ttfb);

        let thresholds = Thresholds::new(Some(map));
        assert_eq!(thresholds.number("ttfb", "p95_threshold_ms", 3000.0), 1500.0);
        assert!(thresholds.is_overridden("ttfb", "p95_threshold_ms"));

        // Unrelated keys fall back.
        assert_eq!(
            thresholds.number("noise_resilience", "min_pass_snr_db", 10.0),
            10.0
        );
        assert!(!thresholds.is_overridden("echo", "loop_threshold"));
    }
}
