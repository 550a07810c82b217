use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;

use crate::domain::ChecklistDefinition;

use super::ConfigStore;

/// Loads checklist definitions from `*.json` files under a base directory
/// (file stem = checklist name) and seeds them into a config store as active
/// version 1. This is how the CLI provisions checklists.
pub struct FileChecklistSource {
    base_path: PathBuf,
    cache: OnceCell<Vec<(String, String)>>,
}

impl FileChecklistSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: OnceCell::new(),
        }
    }

    /// Read, parse-check, and cache all definitions under the base directory.
    pub fn load(&self) -> Result<&[(String, String)]> {
        let definitions = self.cache.get_or_try_init(|| {
            let mut definitions = Vec::new();
            let entries = fs::read_dir(&self.base_path).with_context(|| {
                format!(
                    "failed to read checklist directory {}",
                    self.base_path.display()
                )
            })?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                let content = fs::read_to_string(&path).with_context(|| {
                    format!("failed to read checklist file {}", path.display())
                })?;
                ChecklistDefinition::parse(&content).with_context(|| {
                    format!("invalid checklist definition in {}", path.display())
                })?;
                definitions.push((name.to_string(), content));
            }
            definitions.sort_by(|a, b| a.0.cmp(&b.0));
            Ok::<_, anyhow::Error>(definitions)
        })?;
        Ok(definitions)
    }

    /// Insert every loaded definition as a fresh active version.
    pub async fn seed<S: ConfigStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let definitions = self.load()?;
        for (name, content) in definitions {
            let version = store
                .insert_version(name, content, now)
                .await
                .with_context(|| format!("failed to insert checklist `{name}`"))?;
            store
                .activate_version(version.id)
                .await
                .with_context(|| format!("failed to activate checklist `{name}`"))?;
        }
        Ok(definitions.len())
    }
}
