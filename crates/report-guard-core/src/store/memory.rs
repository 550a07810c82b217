use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    Analysis, AnalysisId, AuditEntry, ChecklistOverride, ChecklistStatus, ChecklistVersion,
    Finding, FindingDraft, OverrideId, OverrideScope, OverrideStatus, ProviderConfig, Report,
    ReportId, ReportStatus, TenantId, VersionId,
};

use super::{
    AnalysisStore, AuditStore, Claim, ConfigStore, ReportStore, SkipReason, StoreError,
};

/// In-memory persistence used by the CLI and tests. Every method body runs
/// under one lock, which stands in for the transaction boundary a relational
/// backend would provide.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    reports: HashMap<ReportId, Report>,
    in_flight: HashSet<ReportId>,
    analyses: Vec<Analysis>,
    findings: Vec<Finding>,
    versions: Vec<ChecklistVersion>,
    overrides: Vec<ChecklistOverride>,
    providers: Vec<ProviderConfig>,
    audit: Vec<AuditEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means a panic mid-update; propagating the inner
        // state is still safe for reads and the process is going down anyway.
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn create_report(&self, report: Report) -> Result<Report, StoreError> {
        let mut state = self.lock();
        state.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn report(&self, id: ReportId) -> Result<Option<Report>, StoreError> {
        Ok(self.lock().reports.get(&id).cloned())
    }

    async fn reports_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Report>, StoreError> {
        let state = self.lock();
        let mut reports: Vec<_> = state
            .reports
            .values()
            .filter(|report| &report.tenant == tenant)
            .cloned()
            .collect();
        reports.sort_by_key(|report| report.uploaded_at);
        Ok(reports)
    }

    async fn claim_for_processing(&self, id: ReportId) -> Result<Claim, StoreError> {
        let mut state = self.lock();
        let Some(report) = state.reports.get(&id) else {
            return Ok(Claim::Skipped(SkipReason::Missing));
        };
        if report.status != ReportStatus::Processing {
            return Ok(Claim::Skipped(SkipReason::Terminal(report.status)));
        }
        if report.is_soft_deleted() {
            return Ok(Claim::Skipped(SkipReason::SoftDeleted));
        }
        if !state.in_flight.insert(id) {
            return Ok(Claim::Skipped(SkipReason::InFlight));
        }
        let report = state.reports[&id].clone();
        debug!(report = %id, "claimed report for processing");
        Ok(Claim::Claimed(report))
    }

    async fn release_claim(&self, id: ReportId) -> Result<(), StoreError> {
        self.lock().in_flight.remove(&id);
        Ok(())
    }

    async fn record_success(
        &self,
        id: ReportId,
        analysis: Analysis,
        findings: Vec<FindingDraft>,
    ) -> Result<Analysis, StoreError> {
        let mut state = self.lock();
        let report = state
            .reports
            .get_mut(&id)
            .ok_or(StoreError::ReportNotFound(id))?;
        report.status = ReportStatus::Done;
        report.score = Some(analysis.score);
        report.finding_count = Some(findings.len() as u32);
        report.error_message = None;
        let attached: Vec<Finding> = findings
            .into_iter()
            .map(|draft| draft.attach(analysis.id))
            .collect();
        state.findings.extend(attached);
        state.analyses.push(analysis.clone());
        state.in_flight.remove(&id);
        Ok(analysis)
    }

    async fn record_failure(&self, id: ReportId, message: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let report = state
            .reports
            .get_mut(&id)
            .ok_or(StoreError::ReportNotFound(id))?;
        report.status = ReportStatus::Failed;
        report.score = None;
        report.finding_count = None;
        report.error_message = Some(message.to_string());
        state.in_flight.remove(&id);
        Ok(())
    }

    async fn set_conclusion_key(&self, id: ReportId, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let report = state
            .reports
            .get_mut(&id)
            .ok_or(StoreError::ReportNotFound(id))?;
        report.conclusion_key = Some(key.to_string());
        Ok(())
    }

    async fn soft_delete(&self, id: ReportId, now: DateTime<Utc>) -> Result<Report, StoreError> {
        let mut state = self.lock();
        let report = state
            .reports
            .get_mut(&id)
            .ok_or(StoreError::ReportNotFound(id))?;
        report.deleted_at = Some(now);
        Ok(report.clone())
    }

    async fn restore(&self, id: ReportId) -> Result<Report, StoreError> {
        let mut state = self.lock();
        let report = state
            .reports
            .get_mut(&id)
            .ok_or(StoreError::ReportNotFound(id))?;
        report.deleted_at = None;
        Ok(report.clone())
    }

    async fn purge(&self, id: ReportId) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.reports.remove(&id).is_none() {
            return Err(StoreError::ReportNotFound(id));
        }
        let doomed: HashSet<AnalysisId> = state
            .analyses
            .iter()
            .filter(|analysis| analysis.report_id == id)
            .map(|analysis| analysis.id)
            .collect();
        state.analyses.retain(|analysis| analysis.report_id != id);
        state
            .findings
            .retain(|finding| !doomed.contains(&finding.analysis_id));
        state.in_flight.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn latest_analysis(&self, report: ReportId) -> Result<Option<Analysis>, StoreError> {
        let state = self.lock();
        Ok(state
            .analyses
            .iter()
            .rev()
            .find(|analysis| analysis.report_id == report)
            .cloned())
    }

    async fn analyses_for_report(&self, report: ReportId) -> Result<Vec<Analysis>, StoreError> {
        let state = self.lock();
        Ok(state
            .analyses
            .iter()
            .filter(|analysis| analysis.report_id == report)
            .cloned()
            .collect())
    }

    async fn findings_for_analysis(
        &self,
        analysis: AnalysisId,
    ) -> Result<Vec<Finding>, StoreError> {
        let state = self.lock();
        Ok(state
            .findings
            .iter()
            .filter(|finding| finding.analysis_id == analysis)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn insert_version(
        &self,
        name: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ChecklistVersion, StoreError> {
        let mut state = self.lock();
        let next = state
            .versions
            .iter()
            .filter(|version| version.name == name)
            .map(|version| version.version)
            .max()
            .unwrap_or(0)
            + 1;
        let version = ChecklistVersion::draft(name, next, content, now);
        state.versions.push(version.clone());
        Ok(version)
    }

    async fn version(&self, id: VersionId) -> Result<Option<ChecklistVersion>, StoreError> {
        let state = self.lock();
        Ok(state
            .versions
            .iter()
            .find(|version| version.id == id)
            .cloned())
    }

    async fn versions_for(&self, name: &str) -> Result<Vec<ChecklistVersion>, StoreError> {
        let state = self.lock();
        let mut versions: Vec<_> = state
            .versions
            .iter()
            .filter(|version| version.name == name)
            .cloned()
            .collect();
        versions.sort_by_key(|version| version.version);
        Ok(versions)
    }

    async fn checklist_names(&self) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        let mut names: Vec<_> = state
            .versions
            .iter()
            .map(|version| version.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn active_version(&self, name: &str) -> Result<Option<ChecklistVersion>, StoreError> {
        let state = self.lock();
        Ok(state
            .versions
            .iter()
            .find(|version| version.name == name && version.status == ChecklistStatus::Active)
            .cloned())
    }

    async fn activate_version(&self, id: VersionId) -> Result<ChecklistVersion, StoreError> {
        let mut state = self.lock();
        let name = state
            .versions
            .iter()
            .find(|version| version.id == id)
            .map(|version| version.name.clone())
            .ok_or(StoreError::VersionNotFound(id))?;
        for version in state
            .versions
            .iter_mut()
            .filter(|version| version.name == name)
        {
            if version.status == ChecklistStatus::Active {
                version.status = ChecklistStatus::Archived;
            }
        }
        let version = state
            .versions
            .iter_mut()
            .find(|version| version.id == id)
            .expect("version existed above");
        version.status = ChecklistStatus::Active;
        Ok(version.clone())
    }

    async fn rollback_version(
        &self,
        name: &str,
        target_version: u32,
        now: DateTime<Utc>,
    ) -> Result<ChecklistVersion, StoreError> {
        let mut state = self.lock();
        let content = state
            .versions
            .iter()
            .find(|version| version.name == name && version.version == target_version)
            .map(|version| version.content.clone())
            .ok_or_else(|| StoreError::VersionNumberNotFound {
                checklist: name.to_string(),
                version: target_version,
            })?;
        let next = state
            .versions
            .iter()
            .filter(|version| version.name == name)
            .map(|version| version.version)
            .max()
            .unwrap_or(0)
            + 1;
        let version = ChecklistVersion::draft(name, next, content, now);
        state.versions.push(version.clone());
        Ok(version)
    }

    async fn insert_override(
        &self,
        entry: ChecklistOverride,
    ) -> Result<ChecklistOverride, StoreError> {
        let mut state = self.lock();
        if entry.status == OverrideStatus::Active
            && state.overrides.iter().any(|existing| {
                existing.checklist == entry.checklist
                    && existing.scope == entry.scope
                    && existing.status == OverrideStatus::Active
            })
        {
            return Err(StoreError::ActiveOverrideExists {
                checklist: entry.checklist.clone(),
                scope: entry.scope.label(),
            });
        }
        state.overrides.push(entry.clone());
        Ok(entry)
    }

    async fn active_override(
        &self,
        name: &str,
        scope: &OverrideScope,
    ) -> Result<Option<ChecklistOverride>, StoreError> {
        let state = self.lock();
        Ok(state
            .overrides
            .iter()
            .find(|entry| {
                entry.checklist == name
                    && &entry.scope == scope
                    && entry.status == OverrideStatus::Active
            })
            .cloned())
    }

    async fn activate_override(&self, id: OverrideId) -> Result<ChecklistOverride, StoreError> {
        let mut state = self.lock();
        let (checklist, scope) = state
            .overrides
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| (entry.checklist.clone(), entry.scope.clone()))
            .ok_or(StoreError::OverrideNotFound(id))?;
        for entry in state
            .overrides
            .iter_mut()
            .filter(|entry| entry.checklist == checklist && entry.scope == scope)
        {
            entry.status = OverrideStatus::Draft;
        }
        let entry = state
            .overrides
            .iter_mut()
            .find(|entry| entry.id == id)
            .expect("override existed above");
        entry.status = OverrideStatus::Active;
        Ok(entry.clone())
    }

    async fn insert_provider(&self, config: ProviderConfig) -> Result<ProviderConfig, StoreError> {
        let mut state = self.lock();
        if config.is_active {
            if let Some(active) = state.providers.iter().find(|existing| existing.is_active) {
                return Err(StoreError::ActiveProviderExists {
                    name: active.name.clone(),
                });
            }
        }
        state.providers.push(config.clone());
        Ok(config)
    }

    async fn active_provider(&self) -> Result<Option<ProviderConfig>, StoreError> {
        let state = self.lock();
        Ok(state
            .providers
            .iter()
            .find(|config| config.is_active)
            .cloned())
    }

    async fn activate_provider(&self, name: &str) -> Result<ProviderConfig, StoreError> {
        let mut state = self.lock();
        if !state.providers.iter().any(|config| config.name == name) {
            return Err(StoreError::ProviderNotFound(name.to_string()));
        }
        for config in state.providers.iter_mut() {
            config.is_active = config.name == name;
        }
        let config = state
            .providers
            .iter()
            .find(|config| config.name == name)
            .expect("provider existed above");
        Ok(config.clone())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.lock().audit.push(entry);
        Ok(())
    }

    async fn audit_trail(&self, report: ReportId) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.lock();
        Ok(state
            .audit
            .iter()
            .filter(|entry| entry.report_id == report)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineKind, Score};

    fn sample_report() -> Report {
        Report::new(
            TenantId::new("acme"),
            "inspector@example.com",
            "site.txt",
            "asbestos-inventory",
            "blob-1",
            "cafe",
            64,
            Utc::now(),
        )
    }

    fn sample_analysis(report_id: ReportId) -> Analysis {
        let now = Utc::now();
        Analysis {
            id: AnalysisId::new(),
            report_id,
            engine: EngineKind::Rules,
            engine_version: "test".into(),
            score: Score::from_hundredths(5_500),
            summary: "summary".into(),
            rules_passed: 8,
            rules_failed: 2,
            started_at: now,
            finished_at: now,
            duration_ms: 5,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let report = store.create_report(sample_report()).await.unwrap();

        assert!(matches!(
            store.claim_for_processing(report.id).await.unwrap(),
            Claim::Claimed(_)
        ));
        assert!(matches!(
            store.claim_for_processing(report.id).await.unwrap(),
            Claim::Skipped(SkipReason::InFlight)
        ));

        store.release_claim(report.id).await.unwrap();
        assert!(matches!(
            store.claim_for_processing(report.id).await.unwrap(),
            Claim::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn claim_skips_terminal_and_soft_deleted_reports() {
        let store = MemoryStore::new();
        let report = store.create_report(sample_report()).await.unwrap();
        store.record_failure(report.id, "boom").await.unwrap();
        assert!(matches!(
            store.claim_for_processing(report.id).await.unwrap(),
            Claim::Skipped(SkipReason::Terminal(ReportStatus::Failed))
        ));

        let second = store.create_report(sample_report()).await.unwrap();
        store.soft_delete(second.id, Utc::now()).await.unwrap();
        assert!(matches!(
            store.claim_for_processing(second.id).await.unwrap(),
            Claim::Skipped(SkipReason::SoftDeleted)
        ));
    }

    #[tokio::test]
    async fn record_success_mirrors_score_onto_report() {
        let store = MemoryStore::new();
        let report = store.create_report(sample_report()).await.unwrap();
        let analysis = sample_analysis(report.id);
        let draft = FindingDraft {
            rule_id: "SCOPE_SAMPLING_PLAN".into(),
            section: Some("2.1".into()),
            severity: crate::domain::Severity::Critical,
            message: "missing sampling plan".into(),
            suggestion: None,
            evidence: None,
            tags: Vec::new(),
        };

        let stored = store
            .record_success(report.id, analysis.clone(), vec![draft])
            .await
            .unwrap();

        let report = store.report(report.id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Done);
        assert_eq!(report.score, Some(stored.score));
        assert_eq!(report.finding_count, Some(1));

        let latest = store.latest_analysis(report.id).await.unwrap().unwrap();
        assert_eq!(latest.id, stored.id);
        let findings = store.findings_for_analysis(stored.id).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].analysis_id, stored.id);
    }

    #[tokio::test]
    async fn latest_analysis_tracks_reruns() {
        let store = MemoryStore::new();
        let report = store.create_report(sample_report()).await.unwrap();
        let first = sample_analysis(report.id);
        let second = sample_analysis(report.id);
        store
            .record_success(report.id, first, Vec::new())
            .await
            .unwrap();
        store
            .record_success(report.id, second.clone(), Vec::new())
            .await
            .unwrap();
        let latest = store.latest_analysis(report.id).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn version_numbers_are_monotonic_per_name() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let v1 = store.insert_version("inv", "{}", now).await.unwrap();
        let v2 = store.insert_version("inv", "{}", now).await.unwrap();
        let other = store.insert_version("other", "{}", now).await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other.version, 1);
    }

    #[tokio::test]
    async fn activation_swaps_the_single_active_version() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let v1 = store.insert_version("inv", "one", now).await.unwrap();
        let v2 = store.insert_version("inv", "two", now).await.unwrap();

        store.activate_version(v1.id).await.unwrap();
        store.activate_version(v2.id).await.unwrap();

        let versions = store.versions_for("inv").await.unwrap();
        assert_eq!(versions[0].status, ChecklistStatus::Archived);
        assert_eq!(versions[1].status, ChecklistStatus::Active);
        let active = store.active_version("inv").await.unwrap().unwrap();
        assert_eq!(active.id, v2.id);
    }

    #[tokio::test]
    async fn rollback_clones_content_into_new_draft() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let v1 = store.insert_version("inv", "original", now).await.unwrap();
        store.insert_version("inv", "changed", now).await.unwrap();
        store.activate_version(v1.id).await.unwrap();

        let rolled = store.rollback_version("inv", 1, now).await.unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.content, "original");
        assert_eq!(rolled.status, ChecklistStatus::Draft);

        let err = store.rollback_version("inv", 9, now).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionNumberNotFound { version: 9, .. }
        ));
    }

    #[tokio::test]
    async fn inserting_second_active_override_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let scope = OverrideScope::Tenant(TenantId::new("acme"));
        let mut first = ChecklistOverride::draft("inv", scope.clone(), "a", now);
        first.status = OverrideStatus::Active;
        store.insert_override(first).await.unwrap();

        let mut second = ChecklistOverride::draft("inv", scope.clone(), "b", now);
        second.status = OverrideStatus::Active;
        let err = store.insert_override(second).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveOverrideExists { .. }));

        // A draft in the same scope is fine, and activating it swaps.
        let draft = ChecklistOverride::draft("inv", scope.clone(), "c", now);
        let draft = store.insert_override(draft).await.unwrap();
        store.activate_override(draft.id).await.unwrap();
        let active = store.active_override("inv", &scope).await.unwrap().unwrap();
        assert_eq!(active.id, draft.id);
        assert_eq!(active.content, "c");
    }

    #[tokio::test]
    async fn provider_activation_is_exclusive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mk = |name: &str, active: bool| ProviderConfig {
            id: crate::domain::ProviderId::new(),
            name: name.into(),
            provider: "anthropic".into(),
            model: "claude-3-haiku".into(),
            credential: "key".into(),
            endpoint: None,
            is_active: active,
            created_at: now,
        };
        store.insert_provider(mk("primary", true)).await.unwrap();
        let err = store.insert_provider(mk("second", true)).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveProviderExists { .. }));

        store.insert_provider(mk("second", false)).await.unwrap();
        store.activate_provider("second").await.unwrap();
        let active = store.active_provider().await.unwrap().unwrap();
        assert_eq!(active.name, "second");
    }

    #[tokio::test]
    async fn purge_removes_report_analyses_and_findings() {
        let store = MemoryStore::new();
        let report = store.create_report(sample_report()).await.unwrap();
        let analysis = sample_analysis(report.id);
        let draft = FindingDraft {
            rule_id: "R".into(),
            section: None,
            severity: crate::domain::Severity::Low,
            message: "m".into(),
            suggestion: None,
            evidence: None,
            tags: Vec::new(),
        };
        let stored = store
            .record_success(report.id, analysis, vec![draft])
            .await
            .unwrap();

        store.purge(report.id).await.unwrap();
        assert!(store.report(report.id).await.unwrap().is_none());
        assert!(store.latest_analysis(report.id).await.unwrap().is_none());
        assert!(store
            .findings_for_analysis(stored.id)
            .await
            .unwrap()
            .is_empty());
    }
}
