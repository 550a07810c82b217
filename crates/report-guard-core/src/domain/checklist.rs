use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Severity, TenantId, VersionId, OverrideId};

/// Publication state of one checklist version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistStatus {
    Draft,
    Active,
    Archived,
}

/// A named, versioned checklist definition. Content is immutable once the
/// version is activated; corrections go through a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistVersion {
    pub id: VersionId,
    pub name: String,
    pub version: u32,
    pub status: ChecklistStatus,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChecklistVersion {
    pub fn draft(
        name: impl Into<String>,
        version: u32,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VersionId::new(),
            name: name.into(),
            version,
            status: ChecklistStatus::Draft,
            content: content.into(),
            created_at,
        }
    }
}

/// Who an override applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "tenant")]
pub enum OverrideScope {
    Global,
    Tenant(TenantId),
}

impl OverrideScope {
    pub fn label(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Tenant(tenant) => format!("tenant:{tenant}"),
        }
    }
}

/// Overrides are either drafts or active; they have no archive state because
/// deactivation simply returns resolution to the base checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStatus {
    Draft,
    Active,
}

/// Scoped content replacement for a checklist, decoupled from base versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistOverride {
    pub id: OverrideId,
    pub checklist: String,
    pub scope: OverrideScope,
    pub status: OverrideStatus,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChecklistOverride {
    pub fn draft(
        checklist: impl Into<String>,
        scope: OverrideScope,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OverrideId::new(),
            checklist: checklist.into(),
            scope,
            status: OverrideStatus::Draft,
            content: content.into(),
            created_at,
        }
    }
}

/// Whether a checklist item matches literally or as a regular expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Keyword,
    Pattern,
}

/// What the rules engine expects of the item's pattern in a compliant report.
///
/// `Present` items describe mandatory content: the finding fires when the
/// pattern is missing. `Absent` items describe disqualifying content: the
/// finding fires when the pattern occurs, with the match as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Present,
    Absent,
}

/// One compliance rule inside a checklist definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Namespaced identifier, e.g. `SCOPE_SAMPLING_PLAN`.
    pub id: String,
    #[serde(default)]
    pub section: Option<String>,
    pub severity: Severity,
    pub kind: MatchKind,
    pub pattern: String,
    #[serde(default = "Expectation::default_present")]
    pub expect: Expectation,
    /// Message recorded on the finding when the item is violated.
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Character window captured around evidence matches.
    #[serde(default)]
    pub window: Option<usize>,
}

impl Expectation {
    fn default_present() -> Self {
        Self::Present
    }
}

/// Parsed checklist content: what both evaluation strategies consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistDefinition {
    pub title: String,
    /// Preamble prepended to the AI prompt; the rules engine ignores it.
    #[serde(default)]
    pub instructions: Option<String>,
    pub items: Vec<ChecklistItem>,
}

impl ChecklistDefinition {
    /// Parse and validate checklist content.
    pub fn parse(content: &str) -> Result<Self, ChecklistDefinitionError> {
        let definition: Self = serde_json::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), ChecklistDefinitionError> {
        if self.items.is_empty() {
            return Err(ChecklistDefinitionError::NoItems);
        }
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if item.id.trim().is_empty() {
                return Err(ChecklistDefinitionError::BlankItemId);
            }
            if !seen.insert(item.id.clone()) {
                return Err(ChecklistDefinitionError::DuplicateItemId {
                    item_id: item.id.clone(),
                });
            }
            if item.pattern.is_empty() {
                return Err(ChecklistDefinitionError::EmptyPattern {
                    item_id: item.id.clone(),
                });
            }
            if let Some(window) = item.window {
                if window == 0 {
                    return Err(ChecklistDefinitionError::InvalidWindow {
                        item_id: item.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn item_count(&self) -> u32 {
        self.items.len() as u32
    }
}

/// Errors emitted while parsing or validating checklist content.
#[derive(Debug, Error)]
pub enum ChecklistDefinitionError {
    #[error("checklist content is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("checklist defines no items")]
    NoItems,
    #[error("checklist item id must not be blank")]
    BlankItemId,
    #[error("duplicate checklist item id `{item_id}`")]
    DuplicateItemId { item_id: String },
    #[error("checklist item `{item_id}` pattern must not be empty")]
    EmptyPattern { item_id: String },
    #[error("checklist item `{item_id}` window must be > 0 when specified")]
    InvalidWindow { item_id: String },
}
