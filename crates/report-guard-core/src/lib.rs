pub mod domain;
pub mod engine;
pub mod lifecycle;
pub mod queue;
pub mod render;
pub mod resolver;
pub mod retry;
pub mod scoring;
pub mod settings;
pub mod storage;
pub mod store;
pub mod worker;

pub use domain::{
    Analysis, AnalysisId, AuditAction, AuditEntry, ChecklistDefinition, ChecklistItem,
    ChecklistOverride, ChecklistStatus, ChecklistVersion, EngineKind, Expectation, Finding,
    FindingDraft, FindingId, MatchKind, OverrideId, OverrideScope, OverrideStatus, ProviderConfig,
    ProviderId, Report, ReportId, ReportStatus, Score, Severity, TenantId, VersionId,
};
pub use engine::{
    AiClient, AiClientError, AiEvaluator, EngineError, Evaluation, Evaluator, HttpAiClient,
    RulesEvaluator,
};
pub use lifecycle::{LifecycleError, LifecycleManager};
pub use queue::{Job, JobQueue, MemoryJobQueue};
pub use render::{
    ConclusionPipeline, ConclusionRenderer, MarkdownConclusion, PlainTextConclusion, RenderError,
    RenderedConclusion,
};
pub use resolver::{ConfigResolver, ResolutionScope, Resolved, ResolveError, TestRunError};
pub use retry::RetryPolicy;
pub use scoring::{score_findings, Scored, SeverityWeights};
pub use settings::CoreSettings;
pub use storage::{BlobStorage, MemoryBlobStorage, StorageError};
pub use store::{
    file_source::FileChecklistSource, memory::MemoryStore, AnalysisStore, AuditStore, Claim,
    ConfigStore, ReportStore, SkipReason, StoreError,
};
pub use worker::{register_upload, AnalysisWorker, JobOutcome, WorkerError};
