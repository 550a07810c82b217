use serde::{Deserialize, Serialize};

use crate::domain::{FindingDraft, Score, Severity};

/// Points deducted per finding, keyed by severity. Held in hundredths so the
/// running total never touches floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeverityWeights {
    /// Build weights from whole points, e.g. `from_points(30, 15, 7, 3)`.
    pub fn from_points(critical: u32, high: u32, medium: u32, low: u32) -> Self {
        Self {
            critical: critical * 100,
            high: high * 100,
            medium: medium * 100,
            low: low * 100,
        }
    }

    pub fn for_severity(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self::from_points(30, 15, 7, 3)
    }
}

/// Aggregated outcome of scoring one finding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scored {
    pub score: Score,
    pub rules_passed: u32,
    pub rules_failed: u32,
}

/// Pure aggregation shared by both evaluation strategies: start at 100,
/// subtract the weight of every finding, clamp to [0, 100].
pub fn score_findings(findings: &[FindingDraft], total_items: u32, weights: &SeverityWeights) -> Scored {
    let deducted: i64 = findings
        .iter()
        .map(|finding| i64::from(weights.for_severity(finding.severity)))
        .sum();
    let score = Score::from_hundredths(i64::from(Score::MAX.hundredths()) - deducted);
    let rules_failed = findings.len() as u32;
    Scored {
        score,
        rules_passed: total_items.saturating_sub(rules_failed),
        rules_failed,
    }
}
