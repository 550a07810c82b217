use std::fmt::Write as _;

use thiserror::Error;
use tracing::warn;

use crate::domain::{Analysis, Finding, Report};

/// Rendering failure. Non-fatal to the analysis outcome: the orchestrator
/// downgrades it to a warning because the evaluation itself succeeded.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("conclusion rendering failed: {0}")]
    Failed(String),
    #[error("both conclusion renderers failed: primary: {primary}; fallback: {fallback}")]
    Exhausted { primary: String, fallback: String },
}

/// Pure transformation from persisted analysis data to a document.
pub trait ConclusionRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn render(
        &self,
        report: &Report,
        analysis: &Analysis,
        findings: &[Finding],
    ) -> Result<Vec<u8>, RenderError>;
}

/// Conclusion artifact plus the renderer that actually produced it.
#[derive(Debug, Clone)]
pub struct RenderedConclusion {
    pub bytes: Vec<u8>,
    pub renderer: &'static str,
}

/// Primary renderer: a full Markdown conclusion document.
#[derive(Debug, Default, Clone)]
pub struct MarkdownConclusion;

impl ConclusionRenderer for MarkdownConclusion {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn render(
        &self,
        report: &Report,
        analysis: &Analysis,
        findings: &[Finding],
    ) -> Result<Vec<u8>, RenderError> {
        let mut out = String::new();
        render_markdown(&mut out, report, analysis, findings)
            .map_err(|err| RenderError::Failed(err.to_string()))?;
        Ok(out.into_bytes())
    }
}

fn render_markdown(
    out: &mut String,
    report: &Report,
    analysis: &Analysis,
    findings: &[Finding],
) -> std::fmt::Result {
    writeln!(out, "# Compliance conclusion — {}", report.filename)?;
    writeln!(out)?;
    writeln!(out, "| | |")?;
    writeln!(out, "|---|---|")?;
    writeln!(out, "| Tenant | {} |", report.tenant)?;
    writeln!(out, "| Checklist | {} |", report.checklist)?;
    writeln!(out, "| Uploaded | {} |", report.uploaded_at.to_rfc3339())?;
    writeln!(out, "| Engine | {} ({}) |", analysis.engine, analysis.engine_version)?;
    writeln!(
        out,
        "| Rules | {} passed, {} failed |",
        analysis.rules_passed, analysis.rules_failed
    )?;
    writeln!(out)?;
    writeln!(out, "## Score: {} / 100", analysis.score)?;
    writeln!(out)?;
    writeln!(out, "{}", analysis.summary)?;
    writeln!(out)?;

    if findings.is_empty() {
        writeln!(out, "No violations detected.")?;
        return Ok(());
    }

    writeln!(out, "## Findings")?;
    for finding in findings {
        writeln!(out)?;
        let section = finding
            .section
            .as_deref()
            .map(|section| format!(" (section {section})"))
            .unwrap_or_default();
        writeln!(
            out,
            "### [{severity}] {id}{section}",
            severity = finding.severity.label().to_ascii_uppercase(),
            id = finding.rule_id,
        )?;
        writeln!(out, "{}", finding.message)?;
        if let Some(evidence) = &finding.evidence {
            writeln!(out, "> {}", sanitize_line(evidence))?;
        }
        if let Some(suggestion) = &finding.suggestion {
            writeln!(out, "*Suggestion:* {suggestion}")?;
        }
    }
    Ok(())
}

/// Fallback renderer: a terse plain-text summary, lower fidelity but hard
/// to break.
#[derive(Debug, Default, Clone)]
pub struct PlainTextConclusion;

impl ConclusionRenderer for PlainTextConclusion {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn render(
        &self,
        report: &Report,
        analysis: &Analysis,
        findings: &[Finding],
    ) -> Result<Vec<u8>, RenderError> {
        let mut out = String::new();
        render_plain(&mut out, report, analysis, findings)
            .map_err(|err| RenderError::Failed(err.to_string()))?;
        Ok(out.into_bytes())
    }
}

fn render_plain(
    out: &mut String,
    report: &Report,
    analysis: &Analysis,
    findings: &[Finding],
) -> std::fmt::Result {
    writeln!(out, "Conclusion for {}", report.filename)?;
    writeln!(
        out,
        "Score {} / 100 via {} engine; {} passed, {} failed.",
        analysis.score, analysis.engine, analysis.rules_passed, analysis.rules_failed
    )?;
    for finding in findings {
        writeln!(
            out,
            "- [{}] {}: {}",
            finding.severity, finding.rule_id, finding.message
        )?;
    }
    Ok(())
}

/// Primary-then-fallback renderer stack.
pub struct ConclusionPipeline {
    primary: Box<dyn ConclusionRenderer>,
    fallback: Box<dyn ConclusionRenderer>,
}

impl ConclusionPipeline {
    pub fn new(
        primary: Box<dyn ConclusionRenderer>,
        fallback: Box<dyn ConclusionRenderer>,
    ) -> Self {
        Self { primary, fallback }
    }

    pub fn render(
        &self,
        report: &Report,
        analysis: &Analysis,
        findings: &[Finding],
    ) -> Result<RenderedConclusion, RenderError> {
        let primary_err = match self.primary.render(report, analysis, findings) {
            Ok(bytes) => {
                return Ok(RenderedConclusion {
                    bytes,
                    renderer: self.primary.name(),
                })
            }
            Err(err) => err,
        };
        warn!(
            renderer = self.primary.name(),
            error = %primary_err,
            "primary conclusion renderer failed, trying fallback"
        );
        match self.fallback.render(report, analysis, findings) {
            Ok(bytes) => Ok(RenderedConclusion {
                bytes,
                renderer: self.fallback.name(),
            }),
            Err(fallback_err) => Err(RenderError::Exhausted {
                primary: primary_err.to_string(),
                fallback: fallback_err.to_string(),
            }),
        }
    }
}

impl Default for ConclusionPipeline {
    fn default() -> Self {
        Self::new(Box::new(MarkdownConclusion), Box::new(PlainTextConclusion))
    }
}

fn sanitize_line(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}
