use std::sync::Arc;

use chrono::{Duration, Utc};
use report_guard_core::{
    register_upload, AnalysisStore, AnalysisWorker, AuditAction, AuditStore, BlobStorage,
    ChecklistOverride, ConfigStore, CoreSettings, EngineKind, JobOutcome, JobQueue,
    LifecycleManager, MemoryBlobStorage, MemoryJobQueue, MemoryStore, OverrideScope,
    OverrideStatus, Report, ReportStatus, ReportStore, Score, TenantId,
};

const BASE_CHECKLIST: &str = r#"{
    "title": "Asbestos inventory completeness",
    "items": [
        {"id": "SCOPE_SAMPLING_PLAN", "section": "2.1", "severity": "critical", "kind": "keyword", "pattern": "sampling plan", "message": "Report must describe the sampling plan."},
        {"id": "RISK_CLASSIFICATION", "severity": "high", "kind": "keyword", "pattern": "risk class", "message": "Each source must carry a risk classification."},
        {"id": "LAB_UNACCREDITED", "severity": "medium", "kind": "pattern", "pattern": "(?i)non-?accredited", "expect": "absent", "message": "Analyses must come from an accredited laboratory."}
    ]
}"#;

const TENANT_CHECKLIST: &str = r#"{
    "title": "Tenant-specific checklist",
    "items": [
        {"id": "TENANT_CLAUSE", "severity": "low", "kind": "keyword", "pattern": "clause 7", "message": "Tenant contract clause 7 must be cited."}
    ]
}"#;

struct Pipeline {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryJobQueue>,
    blobs: Arc<MemoryBlobStorage>,
    worker: AnalysisWorker<MemoryStore, MemoryJobQueue>,
}

async fn pipeline() -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let blobs = Arc::new(MemoryBlobStorage::new());
    let version = store
        .insert_version("asbestos-inventory", BASE_CHECKLIST, Utc::now())
        .await
        .unwrap();
    store.activate_version(version.id).await.unwrap();

    let mut settings = CoreSettings::default();
    settings.retry.base_delay_ms = 1;
    let worker = AnalysisWorker::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&blobs) as Arc<dyn BlobStorage>,
        &settings,
    );
    Pipeline {
        store,
        queue,
        blobs,
        worker,
    }
}

async fn upload(pipeline: &Pipeline, tenant: &str, text: &str) -> Report {
    let key = pipeline
        .blobs
        .put(text.as_bytes().to_vec())
        .await
        .unwrap();
    let report = Report::new(
        TenantId::new(tenant),
        "inspector@example.com",
        "site-42.txt",
        "asbestos-inventory",
        key,
        "0badc0de",
        text.len() as u64,
        Utc::now(),
    );
    register_upload(
        &*pipeline.store,
        &*pipeline.queue,
        report,
        Some("intake".into()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn violating_report_scores_55_with_ordered_audit_trail() {
    let pipeline = pipeline().await;
    // Sampling plan and risk classification both missing, nothing forbidden:
    // critical (30) + high (15) off 100.
    let report = upload(&pipeline, "acme", "A short report citing nothing of substance.").await;

    let outcomes = pipeline.worker.run_until_idle().await.unwrap();
    assert_eq!(outcomes, vec![JobOutcome::Completed(report.id)]);

    let stored = pipeline.store.report(report.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReportStatus::Done);
    assert_eq!(stored.score, Some(Score::from_hundredths(5_500)));
    assert_eq!(stored.finding_count, Some(2));

    // The denormalized columns mirror the latest analysis exactly.
    let analysis = pipeline
        .store
        .latest_analysis(report.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some(analysis.score), stored.score);
    assert_eq!(analysis.rules_failed, 2);
    assert_eq!(analysis.rules_passed, 1);
    assert_eq!(analysis.engine, EngineKind::Rules);

    // The conclusion artifact landed in blob storage.
    let conclusion_key = stored.conclusion_key.expect("conclusion should be stored");
    let artifact = pipeline.blobs.get(&conclusion_key).await.unwrap();
    let text = String::from_utf8(artifact).unwrap();
    assert!(text.contains("Score: 55.0 / 100"));
    assert!(text.contains("SCOPE_SAMPLING_PLAN"));

    let actions: Vec<_> = pipeline
        .store
        .audit_trail(report.id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Upload,
            AuditAction::ProcessStart,
            AuditAction::ProcessDone
        ]
    );
}

#[tokio::test]
async fn rerun_produces_second_analysis_and_mirrors_the_latest() {
    let pipeline = pipeline().await;
    let report = upload(&pipeline, "acme", "No substance at all.").await;
    pipeline.worker.run_until_idle().await.unwrap();

    // Flip the report back to processing the way a re-run request would,
    // then deliver a fresh job against an amended document.
    let amended = "The sampling plan covers all wings and every source has a risk class.";
    let key = pipeline
        .blobs
        .put(amended.as_bytes().to_vec())
        .await
        .unwrap();
    {
        // Simulate the rerun mutation the API layer performs.
        let mut rerun = pipeline.store.report(report.id).await.unwrap().unwrap();
        rerun.status = ReportStatus::Processing;
        rerun.storage_key = key;
        rerun.score = None;
        rerun.finding_count = None;
        pipeline.store.create_report(rerun).await.unwrap();
    }
    pipeline.queue.enqueue(report.id).await.unwrap();
    pipeline.worker.run_until_idle().await.unwrap();

    let analyses = pipeline
        .store
        .analyses_for_report(report.id)
        .await
        .unwrap();
    assert_eq!(analyses.len(), 2);

    let stored = pipeline.store.report(report.id).await.unwrap().unwrap();
    assert_eq!(stored.score, Some(Score::MAX));
    assert_eq!(stored.finding_count, Some(0));
}

#[tokio::test]
async fn tenant_override_governs_that_tenant_only() {
    let pipeline = pipeline().await;
    let tenant = TenantId::new("acme");
    let mut entry = ChecklistOverride::draft(
        "asbestos-inventory",
        OverrideScope::Tenant(tenant.clone()),
        TENANT_CHECKLIST,
        Utc::now(),
    );
    entry.status = OverrideStatus::Active;
    pipeline.store.insert_override(entry).await.unwrap();

    let text = "The sampling plan covers all wings; risk class B. No mention of the contract.";
    let acme_report = upload(&pipeline, "acme", text).await;
    let other_report = upload(&pipeline, "globex", text).await;
    pipeline.worker.run_until_idle().await.unwrap();

    // acme is judged by its override (clause 7 missing -> low finding).
    let acme_analysis = pipeline
        .store
        .latest_analysis(acme_report.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acme_analysis.rules_failed, 1);
    assert_eq!(acme_analysis.metadata["resolution"], "override:tenant:acme");

    // globex still gets the base checklist, which this text satisfies.
    let other_analysis = pipeline
        .store
        .latest_analysis(other_report.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other_analysis.rules_failed, 0);
    assert_eq!(other_analysis.metadata["resolution"], "base:v1");
}

#[tokio::test]
async fn soft_deleted_report_skips_processing_and_purges_after_retention() {
    let pipeline = pipeline().await;
    let report = upload(&pipeline, "acme", "irrelevant").await;

    let lifecycle = LifecycleManager::new(Arc::clone(&pipeline.store), Duration::days(30));
    let deleted_at = Utc::now();
    lifecycle
        .soft_delete(report.id, Some("admin".into()), deleted_at)
        .await
        .unwrap();

    // The queued job becomes a no-op once the report is soft-deleted.
    let outcomes = pipeline.worker.run_until_idle().await.unwrap();
    assert!(matches!(outcomes[0], JobOutcome::Skipped(_)));
    let stored = pipeline.store.report(report.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReportStatus::Processing);
    assert!(pipeline
        .store
        .latest_analysis(report.id)
        .await
        .unwrap()
        .is_none());

    // Purge rejected inside the window, permitted after it.
    let err = lifecycle
        .purge(report.id, None, deleted_at + Duration::days(29))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        report_guard_core::LifecycleError::RetentionNotElapsed { .. }
    ));

    lifecycle
        .purge(report.id, None, deleted_at + Duration::days(31))
        .await
        .unwrap();
    assert!(pipeline.store.report(report.id).await.unwrap().is_none());

    let trail = pipeline.store.audit_trail(report.id).await.unwrap();
    assert_eq!(trail.last().unwrap().action, AuditAction::Purge);
}
