use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;
use crate::scoring::SeverityWeights;

/// Tunables for the analysis pipeline. The CLI layers these from an optional
/// settings file and `REPORT_GUARD_*` environment variables; defaults match
/// the deployed configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub weights: WeightSettings,
    pub retry: RetrySettings,
    /// Upper bound on one evaluation attempt, AI call included.
    pub engine_timeout_secs: u64,
    /// Days a soft-deleted report is retained before purge is allowed.
    pub retention_days: i64,
    pub checklists_dir: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            weights: WeightSettings::default(),
            retry: RetrySettings::default(),
            engine_timeout_secs: 30,
            retention_days: 30,
            checklists_dir: "./checklists".into(),
        }
    }
}

impl CoreSettings {
    pub fn severity_weights(&self) -> SeverityWeights {
        SeverityWeights::from_points(
            self.weights.critical,
            self.weights.high,
            self.weights.medium,
            self.weights.low,
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            self.retry.multiplier,
        )
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

/// Severity deduction weights in whole points.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightSettings {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            critical: 30,
            high: 15,
            medium: 7,
            low: 3,
        }
    }
}

/// Bounded-attempt backoff knobs shared by the AI path and job redelivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            multiplier: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_deployed_configuration() {
        let settings = CoreSettings::default();
        assert_eq!(settings.severity_weights(), SeverityWeights::from_points(30, 15, 7, 3));
        assert_eq!(settings.retry_policy().max_attempts, 3);
        assert_eq!(settings.engine_timeout(), Duration::from_secs(30));
        assert_eq!(settings.retention(), chrono::Duration::days(30));
    }

    #[test]
    fn partial_overrides_keep_remaining_defaults() {
        let settings: CoreSettings = serde_json::from_value(json!({
            "weights": {"critical": 40},
            "retry": {"max_attempts": 5},
            "retention_days": 7
        }))
        .unwrap();
        assert_eq!(settings.weights.critical, 40);
        assert_eq!(settings.weights.high, 15);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 200);
        assert_eq!(settings.retention_days, 7);
        assert_eq!(settings.engine_timeout_secs, 30);
    }
}
