use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EngineKind, FindingDraft};
use crate::resolver::Resolved;
use crate::scoring::Scored;

pub mod ai;
pub mod rules;

pub use ai::{AiClient, AiClientError, AiEvaluator, HttpAiClient};
pub use rules::RulesEvaluator;

/// Outcome of one evaluation run, before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub engine: EngineKind,
    pub engine_version: String,
    pub summary: String,
    pub findings: Vec<FindingDraft>,
    pub scored: Scored,
}

/// Errors raised by an evaluation strategy.
///
/// Transient failures are retried by the orchestrator within its attempt
/// budget; checklist failures are configuration errors and fail the job
/// outright.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient engine failure: {0}")]
    Transient(String),
    #[error("evaluation timed out after {0} seconds")]
    Timeout(u64),
    #[error("checklist cannot be evaluated: {0}")]
    InvalidChecklist(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Capability interface implemented by the rules and AI strategies.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate report text against a resolved checklist snapshot.
    async fn evaluate(
        &self,
        report_text: &str,
        resolved: &Resolved,
    ) -> Result<Evaluation, EngineError>;

    fn kind(&self) -> EngineKind;
}
