use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::domain::{
    ChecklistDefinition, ChecklistDefinitionError, OverrideScope, ProviderConfig, TenantId,
    VersionId,
};
use crate::engine::{EngineError, Evaluation, Evaluator};
use crate::store::{ConfigStore, StoreError};

/// Where a resolved checklist came from, highest precedence first:
/// tenant-scoped override, then global override, then the active base version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionScope {
    TenantOverride(TenantId),
    GlobalOverride,
    BaseVersion(u32),
}

impl fmt::Display for ResolutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TenantOverride(tenant) => write!(f, "override:tenant:{tenant}"),
            Self::GlobalOverride => f.write_str("override:global"),
            Self::BaseVersion(version) => write!(f, "base:v{version}"),
        }
    }
}

/// Snapshot handed to the evaluation engine. Workers resolve once at start
/// time and never observe activations that happen mid-run.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub checklist: String,
    pub scope: ResolutionScope,
    pub content: String,
    pub definition: ChecklistDefinition,
}

/// Errors from configuration resolution. All of these are configuration
/// errors in the taxonomy sense: fatal for the calling job, never retried.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no active configuration for checklist `{checklist}`")]
    NoActiveConfiguration { checklist: String },
    #[error("no active AI provider configuration")]
    NoActiveProvider,
    #[error("checklist version {0} not found")]
    UnknownVersion(VersionId),
    #[error("resolved configuration for `{checklist}` is unusable: {source}")]
    BadDefinition {
        checklist: String,
        #[source]
        source: ChecklistDefinitionError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Determines which checklist content and provider settings apply to a
/// tenant at evaluation time.
pub struct ConfigResolver<S> {
    store: Arc<S>,
}

impl<S: ConfigStore> ConfigResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve the single applicable checklist for `(tenant, name)`.
    #[instrument(skip(self), fields(tenant = %tenant, checklist = name))]
    pub async fn resolve(&self, tenant: &TenantId, name: &str) -> Result<Resolved, ResolveError> {
        let tenant_scope = OverrideScope::Tenant(tenant.clone());
        if let Some(entry) = self.store.active_override(name, &tenant_scope).await? {
            debug!("resolved tenant-scoped override");
            return Self::finish(
                name,
                ResolutionScope::TenantOverride(tenant.clone()),
                entry.content,
            );
        }
        if let Some(entry) = self
            .store
            .active_override(name, &OverrideScope::Global)
            .await?
        {
            debug!("resolved global override");
            return Self::finish(name, ResolutionScope::GlobalOverride, entry.content);
        }
        if let Some(version) = self.store.active_version(name).await? {
            debug!(version = version.version, "resolved base version");
            return Self::finish(
                name,
                ResolutionScope::BaseVersion(version.version),
                version.content,
            );
        }
        Err(ResolveError::NoActiveConfiguration {
            checklist: name.to_string(),
        })
    }

    /// Resolve the single active AI provider configuration.
    pub async fn resolve_provider(&self) -> Result<ProviderConfig, ResolveError> {
        self.store
            .active_provider()
            .await?
            .ok_or(ResolveError::NoActiveProvider)
    }

    /// Pre-activation test run: evaluate sample text against an explicit
    /// checklist version (any status) with the supplied evaluator. Nothing
    /// is persisted and no active provider is consulted.
    pub async fn test_run<E: Evaluator + ?Sized>(
        &self,
        version_id: VersionId,
        sample_text: &str,
        evaluator: &E,
    ) -> Result<Evaluation, TestRunError> {
        let version = self
            .store
            .version(version_id)
            .await
            .map_err(ResolveError::from)?
            .ok_or(ResolveError::UnknownVersion(version_id))?;
        let resolved = Self::finish(
            &version.name,
            ResolutionScope::BaseVersion(version.version),
            version.content,
        )?;
        let evaluation = evaluator.evaluate(sample_text, &resolved).await?;
        Ok(evaluation)
    }

    fn finish(
        name: &str,
        scope: ResolutionScope,
        content: String,
    ) -> Result<Resolved, ResolveError> {
        let definition =
            ChecklistDefinition::parse(&content).map_err(|source| ResolveError::BadDefinition {
                checklist: name.to_string(),
                source,
            })?;
        Ok(Resolved {
            checklist: name.to_string(),
            scope,
            content,
            definition,
        })
    }
}

/// Test-run failures: either the configuration lookup or the evaluation.
#[derive(Debug, Error)]
pub enum TestRunError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
