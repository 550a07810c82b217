use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Analysis, AnalysisId, AuditAction, AuditEntry, ProviderConfig, Report, ReportId,
};
use crate::engine::{
    AiClient, AiClientError, AiEvaluator, EngineError, Evaluation, Evaluator, HttpAiClient,
    RulesEvaluator,
};
use crate::queue::{Job, JobQueue};
use crate::render::ConclusionPipeline;
use crate::resolver::{ConfigResolver, Resolved, ResolveError};
use crate::retry::RetryPolicy;
use crate::scoring::SeverityWeights;
use crate::settings::CoreSettings;
use crate::storage::BlobStorage;
use crate::store::{
    audit_best_effort, AnalysisStore, AuditStore, Claim, ConfigStore, ReportStore, SkipReason,
    StoreError,
};

/// How one job delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(ReportId),
    Failed(ReportId),
    Skipped(SkipReason),
    Requeued { report_id: ReportId, attempt: u32 },
}

/// Infrastructure failures the worker cannot convert into a report status.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("queue failure: {0}")]
    Queue(String),
}

pub type AiClientFactory =
    Box<dyn Fn(&ProviderConfig) -> Result<Arc<dyn AiClient>, AiClientError> + Send + Sync>;

/// Job-queue consumer owning the report status state machine: claims the
/// report, resolves configuration, runs the engine policy, persists the
/// analysis, renders the conclusion, and writes the audit trail.
pub struct AnalysisWorker<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    blobs: Arc<dyn BlobStorage>,
    resolver: ConfigResolver<S>,
    rules: RulesEvaluator,
    weights: SeverityWeights,
    retry: RetryPolicy,
    engine_timeout: std::time::Duration,
    renderer: ConclusionPipeline,
    ai_factory: AiClientFactory,
}

impl<S, Q> AnalysisWorker<S, Q>
where
    S: ReportStore + AnalysisStore + ConfigStore + AuditStore + Send + Sync + 'static,
    Q: JobQueue,
{
    pub fn new(
        store: Arc<S>,
        queue: Arc<Q>,
        blobs: Arc<dyn BlobStorage>,
        settings: &CoreSettings,
    ) -> Self {
        let engine_timeout = settings.engine_timeout();
        Self {
            resolver: ConfigResolver::new(Arc::clone(&store)),
            store,
            queue,
            blobs,
            rules: RulesEvaluator::new(settings.severity_weights()),
            weights: settings.severity_weights(),
            retry: settings.retry_policy(),
            engine_timeout,
            renderer: ConclusionPipeline::default(),
            ai_factory: Box::new(move |config| {
                HttpAiClient::new(config, engine_timeout)
                    .map(|client| Arc::new(client) as Arc<dyn AiClient>)
            }),
        }
    }

    /// Replace the AI client construction, used to script provider behavior
    /// in tests.
    pub fn with_ai_factory(mut self, factory: AiClientFactory) -> Self {
        self.ai_factory = factory;
        self
    }

    /// Drain the queue, processing jobs until none are ready.
    pub async fn run_until_idle(&self) -> Result<Vec<JobOutcome>, WorkerError> {
        let mut outcomes = Vec::new();
        while let Some(job) = self
            .queue
            .dequeue()
            .await
            .map_err(|err| WorkerError::Queue(err.to_string()))?
        {
            outcomes.push(self.process_job(job).await?);
        }
        Ok(outcomes)
    }

    /// Long-running consume loop for a worker pool member: poll the queue,
    /// sleeping between empty polls, until the shutdown signal flips.
    pub async fn run(
        &self,
        poll_interval: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let job = self
                .queue
                .dequeue()
                .await
                .map_err(|err| WorkerError::Queue(err.to_string()))?;
            match job {
                Some(job) => {
                    self.process_job(job).await?;
                }
                None => {
                    tokio::select! {
                        _ = sleep(poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Process one delivery end to end.
    #[instrument(skip(self), fields(report = %job.report_id, attempt = job.attempt))]
    pub async fn process_job(&self, job: Job) -> Result<JobOutcome, WorkerError> {
        let report = match self.store.claim_for_processing(job.report_id).await? {
            Claim::Claimed(report) => report,
            Claim::Skipped(reason) => {
                debug!(?reason, "job skipped");
                self.ack(&job).await?;
                return Ok(JobOutcome::Skipped(reason));
            }
        };

        audit_best_effort(
            &*self.store,
            AuditEntry::new(
                report.id,
                None,
                AuditAction::ProcessStart,
                Some(format!("delivery attempt {}", job.attempt)),
                Utc::now(),
            ),
        )
        .await;

        let resolved = match self.resolver.resolve(&report.tenant, &report.checklist).await {
            Ok(resolved) => resolved,
            Err(err) => {
                // Configuration errors are not transient; no retry.
                return self
                    .fail(&job, report.id, &format!("configuration error: {err}"))
                    .await;
            }
        };

        let text = match self.blobs.get(&report.storage_key).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                return self
                    .retry_or_fail(&job, report.id, &format!("report text unavailable: {err}"))
                    .await;
            }
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        let (evaluation, engine_meta) = match self.run_engine_policy(&text, &resolved).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => {
                return self
                    .retry_or_fail(&job, report.id, &format!("evaluation failed: {err}"))
                    .await;
            }
            Err(err) => {
                return self
                    .fail(&job, report.id, &format!("evaluation failed: {err}"))
                    .await;
            }
        };
        let finished_at = Utc::now();

        let mut metadata = engine_meta;
        metadata["resolution"] = json!(resolved.scope.to_string());
        let analysis = Analysis {
            id: AnalysisId::new(),
            report_id: report.id,
            engine: evaluation.engine,
            engine_version: evaluation.engine_version.clone(),
            score: evaluation.scored.score,
            summary: evaluation.summary.clone(),
            rules_passed: evaluation.scored.rules_passed,
            rules_failed: evaluation.scored.rules_failed,
            started_at,
            finished_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            metadata,
        };

        let analysis = match self
            .store
            .record_success(report.id, analysis, evaluation.findings.clone())
            .await
        {
            Ok(analysis) => analysis,
            Err(err) => {
                // Never partially committed: the write is atomic, so a
                // failed write leaves the job redeliverable.
                return self
                    .retry_or_fail(&job, report.id, &format!("persistence failure: {err}"))
                    .await;
            }
        };

        info!(
            report = %report.id,
            engine = %analysis.engine,
            score = %analysis.score,
            findings = analysis.rules_failed,
            "analysis recorded"
        );

        let render_note = self.render_conclusion(report.id, &analysis).await;
        audit_best_effort(
            &*self.store,
            AuditEntry::new(
                report.id,
                None,
                AuditAction::ProcessDone,
                render_note,
                Utc::now(),
            ),
        )
        .await;

        self.ack(&job).await?;
        Ok(JobOutcome::Completed(report.id))
    }

    /// Engine selection policy: prefer the AI strategy when a provider is
    /// active, retrying transient failures within the attempt budget; after
    /// exhaustion fall back to the rules strategy for this cycle and record
    /// that explicitly. No active provider means rules directly.
    async fn run_engine_policy(
        &self,
        text: &str,
        resolved: &Resolved,
    ) -> Result<(Evaluation, serde_json::Value), EngineError> {
        let provider = match self.resolver.resolve_provider().await {
            Ok(provider) => provider,
            Err(ResolveError::NoActiveProvider) => {
                let evaluation = self.evaluate_bounded(&self.rules, text, resolved).await?;
                return Ok((evaluation, json!({})));
            }
            Err(err) => return Err(EngineError::Transient(err.to_string())),
        };

        let mut last_error = None;
        match (self.ai_factory)(&provider) {
            Ok(client) => {
                let ai = AiEvaluator::new(client, provider.model.clone(), self.weights);
                for attempt in 1..=self.retry.max_attempts {
                    match self.evaluate_bounded(&ai, text, resolved).await {
                        Ok(evaluation) => {
                            return Ok((evaluation, json!({ "ai_attempts": attempt })));
                        }
                        Err(err) if err.is_transient() => {
                            warn!(attempt, error = %err, "ai evaluation attempt failed");
                            last_error = Some(err);
                            if !self.retry.attempts_exhausted(attempt) {
                                sleep(self.retry.delay_for(attempt)).await;
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "ai client could not be constructed");
                last_error = Some(EngineError::Transient(err.to_string()));
            }
        }

        // Budget spent: explicit, observable fallback. The persisted engine
        // name makes it impossible to mistake this for an AI result.
        let ai_error = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        warn!(provider = %provider.name, error = %ai_error, "falling back to rules engine");
        let evaluation = self.evaluate_bounded(&self.rules, text, resolved).await?;
        Ok((
            evaluation,
            json!({
                "ai_attempts": self.retry.max_attempts,
                "ai_fallback": true,
                "ai_error": ai_error,
            }),
        ))
    }

    async fn evaluate_bounded<E: Evaluator + ?Sized>(
        &self,
        evaluator: &E,
        text: &str,
        resolved: &Resolved,
    ) -> Result<Evaluation, EngineError> {
        match timeout(self.engine_timeout, evaluator.evaluate(text, resolved)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.engine_timeout.as_secs())),
        }
    }

    /// Render and store the conclusion artifact. Rendering faults never
    /// revert `Done`; they surface as a warning note on the audit trail.
    async fn render_conclusion(&self, report_id: ReportId, analysis: &Analysis) -> Option<String> {
        let report = match self.store.report(report_id).await {
            Ok(Some(report)) => report,
            _ => return Some("conclusion unavailable: report reload failed".into()),
        };
        let findings = match self.store.findings_for_analysis(analysis.id).await {
            Ok(findings) => findings,
            Err(err) => {
                warn!(error = %err, "could not load findings for rendering");
                return Some(format!("conclusion unavailable: {err}"));
            }
        };
        match self.renderer.render(&report, analysis, &findings) {
            Ok(rendered) => match self.blobs.put(rendered.bytes).await {
                Ok(key) => {
                    if let Err(err) = self.store.set_conclusion_key(report_id, &key).await {
                        warn!(error = %err, "could not record conclusion key");
                    }
                    debug!(renderer = rendered.renderer, key = %key, "conclusion stored");
                    None
                }
                Err(err) => {
                    warn!(error = %err, "conclusion artifact could not be stored");
                    Some(format!("conclusion unavailable: {err}"))
                }
            },
            Err(err) => {
                warn!(error = %err, "conclusion rendering failed");
                Some(format!("conclusion unavailable: {err}"))
            }
        }
    }

    async fn fail(
        &self,
        job: &Job,
        report_id: ReportId,
        message: &str,
    ) -> Result<JobOutcome, WorkerError> {
        warn!(report = %report_id, message, "report failed");
        self.store.record_failure(report_id, message).await?;
        audit_best_effort(
            &*self.store,
            AuditEntry::new(
                report_id,
                None,
                AuditAction::ProcessFail,
                Some(message.to_string()),
                Utc::now(),
            ),
        )
        .await;
        self.ack(job).await?;
        Ok(JobOutcome::Failed(report_id))
    }

    /// Transient failure: requeue with backoff until the delivery budget is
    /// spent, then settle as failed.
    async fn retry_or_fail(
        &self,
        job: &Job,
        report_id: ReportId,
        message: &str,
    ) -> Result<JobOutcome, WorkerError> {
        if self.retry.attempts_exhausted(job.attempt) {
            return self
                .fail(job, report_id, &format!("{message} (attempts exhausted)"))
                .await;
        }
        self.store.release_claim(report_id).await?;
        self.queue
            .nack(job, self.retry.delay_for(job.attempt))
            .await
            .map_err(|err| WorkerError::Queue(err.to_string()))?;
        debug!(report = %report_id, attempt = job.attempt, "job requeued");
        Ok(JobOutcome::Requeued {
            report_id,
            attempt: job.attempt,
        })
    }

    async fn ack(&self, job: &Job) -> Result<(), WorkerError> {
        self.queue
            .ack(job)
            .await
            .map_err(|err| WorkerError::Queue(err.to_string()))
    }
}

/// Intake step shared by the CLI: persist the upload, audit it, enqueue the
/// analysis job keyed by report id.
pub async fn register_upload<S, Q>(
    store: &S,
    queue: &Q,
    report: Report,
    actor: Option<String>,
) -> Result<Report, WorkerError>
where
    S: ReportStore + AuditStore,
    Q: JobQueue,
{
    let uploaded_at = report.uploaded_at;
    let report = store.create_report(report).await?;
    audit_best_effort(
        store,
        AuditEntry::new(report.id, actor, AuditAction::Upload, None, uploaded_at),
    )
    .await;
    queue
        .enqueue(report.id)
        .await
        .map_err(|err| WorkerError::Queue(err.to_string()))?;
    Ok(report)
}
