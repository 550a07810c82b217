use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod checklist;

pub use checklist::{
    ChecklistDefinition, ChecklistDefinitionError, ChecklistItem, ChecklistStatus,
    ChecklistVersion, Expectation, MatchKind, OverrideScope, OverrideStatus, ChecklistOverride,
};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

entity_id!(
    /// Identifier of one uploaded report.
    ReportId
);
entity_id!(
    /// Identifier of one evaluation run.
    AnalysisId
);
entity_id!(
    /// Identifier of one finding row.
    FindingId
);
entity_id!(
    /// Identifier of one checklist version.
    VersionId
);
entity_id!(
    /// Identifier of one checklist override.
    OverrideId
);
entity_id!(
    /// Identifier of one AI provider configuration.
    ProviderId
);

/// Tenant that owns a report and its checklist overrides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered severity of a checklist violation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Compliance score held as integer hundredths of a point so identical
/// findings always produce identical totals.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Score(u16);

impl Score {
    pub const MIN: Score = Score(0);
    pub const MAX: Score = Score(10_000);

    /// Clamp a raw hundredths value into the valid range.
    pub fn from_hundredths(raw: i64) -> Self {
        Self(raw.clamp(0, 10_000) as u16)
    }

    pub fn hundredths(self) -> u16 {
        self.0
    }

    /// Whole-point representation for display (55.0 for 5_500 hundredths).
    pub fn points(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.points())
    }
}

/// Evaluation strategy that actually produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Rules,
    Ai,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Ai => "ai",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a report. Lifecycle (soft delete, purge) is tracked
/// separately through `deleted_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Processing,
    Done,
    Failed,
}

impl ReportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// One uploaded asbestos-inventory report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub tenant: TenantId,
    pub uploader: String,
    pub filename: String,
    /// Checklist the report is judged against, fixed at upload time.
    pub checklist: String,
    pub status: ReportStatus,
    /// Mirrors the latest analysis; present if and only if status is `Done`.
    pub score: Option<Score>,
    pub finding_count: Option<u32>,
    pub storage_key: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub error_message: Option<String>,
    /// Storage key of the rendered conclusion artifact, when rendering succeeded.
    pub conclusion_key: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Report {
    /// Register a fresh upload. Reports enter the queue as `Processing`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant: TenantId,
        uploader: impl Into<String>,
        filename: impl Into<String>,
        checklist: impl Into<String>,
        storage_key: impl Into<String>,
        checksum: impl Into<String>,
        size_bytes: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReportId::new(),
            tenant,
            uploader: uploader.into(),
            filename: filename.into(),
            checklist: checklist.into(),
            status: ReportStatus::Processing,
            score: None,
            finding_count: None,
            storage_key: storage_key.into(),
            checksum: checksum.into(),
            size_bytes,
            error_message: None,
            conclusion_key: None,
            uploaded_at,
            deleted_at: None,
        }
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One complete evaluation run for a report. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub report_id: ReportId,
    pub engine: EngineKind,
    pub engine_version: String,
    pub score: Score,
    pub summary: String,
    pub rules_passed: u32,
    pub rules_failed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One checklist violation or observation attached to an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub analysis_id: AnalysisId,
    pub rule_id: String,
    pub section: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
    pub evidence: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Finding produced by an evaluator before it is persisted under an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingDraft {
    pub rule_id: String,
    pub section: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
    pub evidence: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl FindingDraft {
    pub fn attach(self, analysis_id: AnalysisId) -> Finding {
        Finding {
            id: FindingId::new(),
            analysis_id,
            rule_id: self.rule_id,
            section: self.section,
            severity: self.severity,
            message: self.message,
            suggestion: self.suggestion,
            evidence: self.evidence,
            tags: self.tags,
        }
    }
}

/// Connection settings for one AI provider. At most one may be active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub name: String,
    /// Provider identifier, e.g. `anthropic` or `openai`.
    pub provider: String,
    pub model: String,
    pub credential: String,
    /// Base URL override, used by tests and self-hosted gateways.
    pub endpoint: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Action recorded on the audit trail of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Upload,
    ProcessStart,
    ProcessDone,
    ProcessFail,
    SoftDelete,
    Restore,
    Purge,
    Download,
    NotificationSent,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::ProcessStart => "process_start",
            Self::ProcessDone => "process_done",
            Self::ProcessFail => "process_fail",
            Self::SoftDelete => "soft_delete",
            Self::Restore => "restore",
            Self::Purge => "purge",
            Self::Download => "download",
            Self::NotificationSent => "notification_sent",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record. Entries survive the report itself on purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub report_id: ReportId,
    pub actor: Option<String>,
    pub action: AuditAction,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        report_id: ReportId,
        actor: Option<String>,
        action: AuditAction,
        note: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_id,
            actor,
            action,
            note,
            recorded_at,
        }
    }
}
