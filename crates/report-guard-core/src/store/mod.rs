use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    Analysis, AnalysisId, AuditEntry, ChecklistOverride, ChecklistVersion, Finding, FindingDraft,
    OverrideId, OverrideScope, ProviderConfig, Report, ReportId, ReportStatus, TenantId, VersionId,
};

pub mod file_source;
pub mod memory;

/// Errors surfaced at the persistence boundary. Uniqueness of the "active"
/// entries is enforced here, inside the store's transaction, not by callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report {0} not found")]
    ReportNotFound(ReportId),
    #[error("checklist version {0} not found")]
    VersionNotFound(VersionId),
    #[error("checklist `{checklist}` has no version {version}")]
    VersionNumberNotFound { checklist: String, version: u32 },
    #[error("override {0} not found")]
    OverrideNotFound(OverrideId),
    #[error("provider configuration `{0}` not found")]
    ProviderNotFound(String),
    #[error("an active override already exists for `{checklist}` in scope {scope}")]
    ActiveOverrideExists { checklist: String, scope: String },
    #[error("an active provider configuration already exists (`{name}`)")]
    ActiveProviderExists { name: String },
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of the compare-and-swap claim taken before any evaluation work.
#[derive(Debug, Clone)]
pub enum Claim {
    Claimed(Report),
    Skipped(SkipReason),
}

/// Why a dequeued job was discarded without running an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    Terminal(ReportStatus),
    SoftDeleted,
    InFlight,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create_report(&self, report: Report) -> Result<Report, StoreError>;

    async fn report(&self, id: ReportId) -> Result<Option<Report>, StoreError>;

    async fn reports_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Report>, StoreError>;

    /// Claim the report for evaluation. Succeeds only when the report is
    /// still `Processing`, not soft-deleted, and not already claimed by
    /// another worker; redelivered jobs for settled reports skip here.
    async fn claim_for_processing(&self, id: ReportId) -> Result<Claim, StoreError>;

    /// Drop the in-flight mark without settling the report, so a requeued
    /// job can claim it again later.
    async fn release_claim(&self, id: ReportId) -> Result<(), StoreError>;

    /// Persist the analysis with its findings and flip the report to `Done`
    /// with mirrored score/finding count, all inside one transaction.
    async fn record_success(
        &self,
        id: ReportId,
        analysis: Analysis,
        findings: Vec<FindingDraft>,
    ) -> Result<Analysis, StoreError>;

    /// Settle the report as `Failed` with an explanatory message.
    async fn record_failure(&self, id: ReportId, message: &str) -> Result<(), StoreError>;

    async fn set_conclusion_key(&self, id: ReportId, key: &str) -> Result<(), StoreError>;

    async fn soft_delete(&self, id: ReportId, now: DateTime<Utc>) -> Result<Report, StoreError>;

    async fn restore(&self, id: ReportId) -> Result<Report, StoreError>;

    /// Irreversibly remove the report and its analyses. Only the lifecycle
    /// manager calls this, after the retention window check.
    async fn purge(&self, id: ReportId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn latest_analysis(&self, report: ReportId) -> Result<Option<Analysis>, StoreError>;

    async fn analyses_for_report(&self, report: ReportId) -> Result<Vec<Analysis>, StoreError>;

    async fn findings_for_analysis(&self, analysis: AnalysisId)
        -> Result<Vec<Finding>, StoreError>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Insert checklist content as a new draft version numbered `max + 1`.
    async fn insert_version(
        &self,
        name: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ChecklistVersion, StoreError>;

    async fn version(&self, id: VersionId) -> Result<Option<ChecklistVersion>, StoreError>;

    async fn versions_for(&self, name: &str) -> Result<Vec<ChecklistVersion>, StoreError>;

    async fn checklist_names(&self) -> Result<Vec<String>, StoreError>;

    async fn active_version(&self, name: &str) -> Result<Option<ChecklistVersion>, StoreError>;

    /// Make the version active, archiving whichever version held that status.
    async fn activate_version(&self, id: VersionId) -> Result<ChecklistVersion, StoreError>;

    /// Clone the target version's content into a fresh draft numbered
    /// `max + 1`; history is never mutated.
    async fn rollback_version(
        &self,
        name: &str,
        target_version: u32,
        now: DateTime<Utc>,
    ) -> Result<ChecklistVersion, StoreError>;

    /// Insert an override. Inserting one that already claims `Active` while
    /// another is active in the same scope is rejected outright.
    async fn insert_override(
        &self,
        entry: ChecklistOverride,
    ) -> Result<ChecklistOverride, StoreError>;

    async fn active_override(
        &self,
        name: &str,
        scope: &OverrideScope,
    ) -> Result<Option<ChecklistOverride>, StoreError>;

    /// Make the override active, deactivating any prior active override in
    /// the same (checklist, scope) pair within the same transaction.
    async fn activate_override(&self, id: OverrideId) -> Result<ChecklistOverride, StoreError>;

    /// Insert a provider configuration; inserting one that claims `is_active`
    /// while another is active is rejected.
    async fn insert_provider(&self, config: ProviderConfig) -> Result<ProviderConfig, StoreError>;

    async fn active_provider(&self) -> Result<Option<ProviderConfig>, StoreError>;

    /// Make the named configuration the single active one.
    async fn activate_provider(&self, name: &str) -> Result<ProviderConfig, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    async fn audit_trail(&self, report: ReportId) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Append an audit entry without letting a failed write disturb the
/// operation it describes; failures are logged and dropped.
pub async fn audit_best_effort<A: AuditStore + ?Sized>(store: &A, entry: AuditEntry) {
    if let Err(err) = store.append_audit(entry).await {
        tracing::warn!(error = %err, "audit append failed");
    }
}
