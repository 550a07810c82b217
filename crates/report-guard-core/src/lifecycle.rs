use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::domain::{AuditAction, AuditEntry, Report, ReportId};
use crate::store::{audit_best_effort, AuditStore, ReportStore, StoreError};

/// Errors from report lifecycle transitions. All are rejected synchronously
/// at the mutation boundary.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("report {0} not found")]
    ReportNotFound(ReportId),
    #[error("report {0} is already soft-deleted")]
    AlreadyDeleted(ReportId),
    #[error("report {0} is not soft-deleted")]
    NotDeleted(ReportId),
    #[error("retention window has not elapsed; purge allowed from {available_at}")]
    RetentionNotElapsed { available_at: DateTime<Utc> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Soft-delete-then-purge lifecycle for reports. Purge is irreversible and
/// gated on a retention window counted from the soft-delete timestamp.
pub struct LifecycleManager<S> {
    store: Arc<S>,
    retention: Duration,
}

impl<S: ReportStore + AuditStore> LifecycleManager<S> {
    pub fn new(store: Arc<S>, retention: Duration) -> Self {
        Self { store, retention }
    }

    async fn require_report(&self, id: ReportId) -> Result<Report, LifecycleError> {
        self.store
            .report(id)
            .await?
            .ok_or(LifecycleError::ReportNotFound(id))
    }

    #[instrument(skip(self))]
    pub async fn soft_delete(
        &self,
        id: ReportId,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Report, LifecycleError> {
        let report = self.require_report(id).await?;
        if report.is_soft_deleted() {
            return Err(LifecycleError::AlreadyDeleted(id));
        }
        let report = self.store.soft_delete(id, now).await?;
        audit_best_effort(
            &*self.store,
            AuditEntry::new(id, actor, AuditAction::SoftDelete, None, now),
        )
        .await;
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn restore(
        &self,
        id: ReportId,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Report, LifecycleError> {
        let report = self.require_report(id).await?;
        if !report.is_soft_deleted() {
            return Err(LifecycleError::NotDeleted(id));
        }
        let report = self.store.restore(id).await?;
        audit_best_effort(
            &*self.store,
            AuditEntry::new(id, actor, AuditAction::Restore, None, now),
        )
        .await;
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn purge(
        &self,
        id: ReportId,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let report = self.require_report(id).await?;
        let Some(deleted_at) = report.deleted_at else {
            return Err(LifecycleError::NotDeleted(id));
        };
        let available_at = deleted_at + self.retention;
        if now < available_at {
            return Err(LifecycleError::RetentionNotElapsed { available_at });
        }
        // The purge entry goes first: the report row is gone afterwards and
        // the trail must keep its terminal record.
        audit_best_effort(
            &*self.store,
            AuditEntry::new(
                id,
                actor,
                AuditAction::Purge,
                Some(format!("purged after soft delete at {deleted_at}")),
                now,
            ),
        )
        .await;
        self.store.purge(id).await?;
        info!(report = %id, "report purged");
        Ok(())
    }
}
