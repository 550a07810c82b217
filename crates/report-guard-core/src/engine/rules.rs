use std::cmp::Ordering;
use std::fmt::Write as _;

use aho_corasick::AhoCorasickBuilder;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, trace};

use crate::domain::{
    ChecklistItem, EngineKind, Expectation, FindingDraft, MatchKind, Severity,
};
use crate::resolver::Resolved;
use crate::scoring::{score_findings, SeverityWeights};

use super::{EngineError, Evaluation, Evaluator};

const DEFAULT_EVIDENCE_WINDOW: usize = 64;
const MAX_EVIDENCE_CHARS: usize = 240;

/// Deterministic evaluation strategy: keyword and pattern matching against
/// the checklist items. Always available; the guaranteed fallback when the
/// AI strategy is unavailable or exhausted.
pub struct RulesEvaluator {
    weights: SeverityWeights,
}

impl RulesEvaluator {
    pub fn new(weights: SeverityWeights) -> Self {
        Self { weights }
    }

    /// Find the first occurrence of each item's pattern in the input.
    fn first_matches(
        items: &[ChecklistItem],
        input: &str,
    ) -> Result<Vec<Option<(usize, usize)>>, EngineError> {
        let mut matches: Vec<Option<(usize, usize)>> = vec![None; items.len()];

        let keyword_indexes: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.kind == MatchKind::Keyword)
            .map(|(idx, _)| idx)
            .collect();
        if !keyword_indexes.is_empty() {
            let patterns: Vec<&str> = keyword_indexes
                .iter()
                .map(|&idx| items[idx].pattern.as_str())
                .collect();
            let automaton = AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(patterns)
                .map_err(|err| {
                    EngineError::InvalidChecklist(format!("keyword automaton: {err}"))
                })?;
            for found in automaton.find_iter(input) {
                let item_idx = keyword_indexes[found.pattern().as_usize()];
                let slot = &mut matches[item_idx];
                if slot.is_none() {
                    *slot = Some((found.start(), found.end()));
                }
            }
        }

        for (idx, item) in items.iter().enumerate() {
            if item.kind != MatchKind::Pattern {
                continue;
            }
            trace!(item = %item.id, "matching pattern item");
            let regex = Regex::new(&item.pattern).map_err(|err| {
                EngineError::InvalidChecklist(format!("item `{}` pattern: {err}", item.id))
            })?;
            matches[idx] = regex
                .find(input)
                .filter(|found| found.start() < found.end())
                .map(|found| (found.start(), found.end()));
        }

        Ok(matches)
    }

    fn violation(item: &ChecklistItem, input: &str, found: Option<(usize, usize)>) -> Option<FindingDraft> {
        let evidence = match (item.expect, found) {
            // Mandatory content missing: violated, nothing to quote.
            (Expectation::Present, None) => None,
            // Disqualifying content found: violated, quote the match.
            (Expectation::Absent, Some(span)) => {
                Some(extract_evidence(input, span, item.window))
            }
            _ => return None,
        };
        Some(FindingDraft {
            rule_id: item.id.clone(),
            section: item.section.clone(),
            severity: item.severity,
            message: item.message.clone(),
            suggestion: item.suggestion.clone(),
            evidence,
            tags: item.tags.clone(),
        })
    }

    fn summarize(total: u32, findings: &[FindingDraft]) -> String {
        if findings.is_empty() {
            return format!("All {total} checklist items satisfied.");
        }
        let mut counts = [0u32; 4];
        for finding in findings {
            let slot = match finding.severity {
                Severity::Critical => 0,
                Severity::High => 1,
                Severity::Medium => 2,
                Severity::Low => 3,
            };
            counts[slot] += 1;
        }
        let mut summary = format!(
            "{failed} of {total} checklist items violated",
            failed = findings.len()
        );
        let labels = ["critical", "high", "medium", "low"];
        let detail: Vec<String> = counts
            .iter()
            .zip(labels)
            .filter(|(count, _)| **count > 0)
            .map(|(count, label)| format!("{count} {label}"))
            .collect();
        let _ = write!(summary, " ({}).", detail.join(", "));
        summary
    }
}

#[async_trait]
impl Evaluator for RulesEvaluator {
    #[instrument(name = "rules_evaluate", skip(self, report_text, resolved), fields(checklist = %resolved.checklist, input_len = report_text.len()))]
    async fn evaluate(
        &self,
        report_text: &str,
        resolved: &Resolved,
    ) -> Result<Evaluation, EngineError> {
        let items = &resolved.definition.items;
        let matches = Self::first_matches(items, report_text)?;

        let mut findings: Vec<FindingDraft> = items
            .iter()
            .zip(matches)
            .filter_map(|(item, found)| Self::violation(item, report_text, found))
            .collect();
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        let scored = score_findings(&findings, resolved.definition.item_count(), &self.weights);
        debug!(
            findings = findings.len(),
            score = %scored.score,
            "rules evaluation completed"
        );

        Ok(Evaluation {
            engine: EngineKind::Rules,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            summary: Self::summarize(resolved.definition.item_count(), &findings),
            findings,
            scored,
        })
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Rules
    }
}

fn extract_evidence(input: &str, span: (usize, usize), window: Option<usize>) -> String {
    let window = window.unwrap_or(DEFAULT_EVIDENCE_WINDOW);
    let start = floor_char_boundary(input, span.0.saturating_sub(window));
    let end = ceil_char_boundary(input, span.1.saturating_add(window));
    input[start..end].chars().take(MAX_EVIDENCE_CHARS).collect()
}

fn floor_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor > 0 && !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor < text.len() && !text.is_char_boundary(cursor) {
        cursor += 1;
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChecklistDefinition, Score};
    use crate::resolver::ResolutionScope;

    fn resolved(content: &str) -> Resolved {
        Resolved {
            checklist: "inv".into(),
            scope: ResolutionScope::BaseVersion(1),
            content: content.to_string(),
            definition: ChecklistDefinition::parse(content).unwrap(),
        }
    }

    const CHECKLIST: &str = r#"{
        "title": "Asbestos inventory completeness",
        "items": [
            {
                "id": "SCOPE_SAMPLING_PLAN",
                "section": "2.1",
                "severity": "critical",
                "kind": "keyword",
                "pattern": "sampling plan",
                "expect": "present",
                "message": "Report must describe the sampling plan."
            },
            {
                "id": "LAB_UNACCREDITED",
                "severity": "high",
                "kind": "pattern",
                "pattern": "(?i)non-?accredited laboratory",
                "expect": "absent",
                "message": "Analyses must come from an accredited laboratory.",
                "window": 16
            },
            {
                "id": "RISK_CLASSIFICATION",
                "severity": "medium",
                "kind": "keyword",
                "pattern": "risk class",
                "expect": "present",
                "message": "Each source must carry a risk classification."
            }
        ]
    }"#;

    #[tokio::test]
    async fn compliant_text_produces_no_findings() {
        let evaluator = RulesEvaluator::new(SeverityWeights::default());
        let text = "The sampling plan covers every wing. Each source has a risk class assigned.";
        let evaluation = evaluator.evaluate(text, &resolved(CHECKLIST)).await.unwrap();
        assert!(evaluation.findings.is_empty());
        assert_eq!(evaluation.scored.score, Score::MAX);
        assert_eq!(evaluation.scored.rules_passed, 3);
        assert_eq!(evaluation.summary, "All 3 checklist items satisfied.");
    }

    #[tokio::test]
    async fn missing_mandatory_content_and_forbidden_content_both_fire() {
        let evaluator = RulesEvaluator::new(SeverityWeights::default());
        let text = "Samples were sent to a non-accredited laboratory in March.";
        let evaluation = evaluator.evaluate(text, &resolved(CHECKLIST)).await.unwrap();

        let ids: Vec<&str> = evaluation
            .findings
            .iter()
            .map(|finding| finding.rule_id.as_str())
            .collect();
        // Ordered by severity descending, then rule id.
        assert_eq!(
            ids,
            vec!["SCOPE_SAMPLING_PLAN", "LAB_UNACCREDITED", "RISK_CLASSIFICATION"]
        );

        let absent = &evaluation.findings[1];
        let evidence = absent.evidence.as_deref().expect("absent items carry evidence");
        assert!(evidence.contains("non-accredited laboratory"));

        let present = &evaluation.findings[0];
        assert!(present.evidence.is_none());

        // critical 30 + high 15 + medium 7 off a 100 base
        assert_eq!(evaluation.scored.score, Score::from_hundredths(4_800));
        assert_eq!(evaluation.scored.rules_failed, 3);
        assert_eq!(evaluation.scored.rules_passed, 0);
    }

    #[tokio::test]
    async fn keyword_matching_is_case_insensitive() {
        let evaluator = RulesEvaluator::new(SeverityWeights::default());
        let text = "SAMPLING PLAN attached; every source lists its Risk Class.";
        let evaluation = evaluator.evaluate(text, &resolved(CHECKLIST)).await.unwrap();
        assert!(evaluation.findings.is_empty());
    }

    #[tokio::test]
    async fn invalid_pattern_is_a_checklist_error() {
        let content = r#"{
            "title": "t",
            "items": [
                {"id": "BAD", "severity": "low", "kind": "pattern", "pattern": "(unclosed", "message": "m"}
            ]
        }"#;
        let evaluator = RulesEvaluator::new(SeverityWeights::default());
        let err = evaluator.evaluate("text", &resolved(content)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidChecklist(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn evidence_respects_char_boundaries() {
        let content = r#"{
            "title": "t",
            "items": [
                {"id": "FORBIDDEN", "severity": "low", "kind": "keyword", "pattern": "afwijking", "expect": "absent", "message": "m", "window": 4}
            ]
        }"#;
        let evaluator = RulesEvaluator::new(SeverityWeights::default());
        let text = "géén afwijking végé";
        let evaluation = evaluator.evaluate(text, &resolved(content)).await.unwrap();
        let evidence = evaluation.findings[0].evidence.as_deref().unwrap();
        assert!(evidence.contains("afwijking"));
    }

    #[tokio::test]
    async fn summary_counts_by_severity() {
        let evaluator = RulesEvaluator::new(SeverityWeights::default());
        let evaluation = evaluator
            .evaluate("nothing relevant", &resolved(CHECKLIST))
            .await
            .unwrap();
        assert_eq!(
            evaluation.summary,
            "2 of 3 checklist items violated (1 critical, 1 medium)."
        );
    }
}
