use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;

use crate::analysis::Rule;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub class: String,
    pub field: String,
    pub value: String,
    pub origin: Rule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one patch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    pub units_scanned: usize,
    pub vault_classes_initialized: usize,
    pub reflection_inferred: usize,
    pub property_inferred: usize,
    pub override_applied: usize,
    /// Vault fields left as empty strings.
    pub defaults: usize,
    /// Fields with recognised call sites but no committed value.
    pub unresolved: usize,
    pub conflicts: usize,
    pub exception_regions_injected: usize,
    pub asset_entries_added: usize,
    /// Files whose content actually changed. Zero on a re-run.
    pub files_written: usize,
    pub commits: Vec<Commit>,
    pub skipped: Vec<SkippedFile>,
}

impl PatchReport {
    pub fn skip(&mut self, path: impl Into<PathBuf>, reason: impl Into<String>) {
        self.skipped.push(SkippedFile {
            path: path.into(),
            reason: reason.into(),
        });
    }

    pub fn log_summary(&self) {
        info!("Units scanned:              {}", self.units_scanned);
        info!("Vault classes initialized:  {}", self.vault_classes_initialized);
        info!("Reflection-inferred values: {}", self.reflection_inferred);
        info!("Property-inferred values:   {}", self.property_inferred);
        info!("Override values:            {}", self.override_applied);
        info!("Empty defaults:             {}", self.defaults);
        info!("Unresolved fields:          {}", self.unresolved);
        info!("Exception regions injected: {}", self.exception_regions_injected);
        info!("Asset entries added:        {}", self.asset_entries_added);
        info!("Files written:              {}", self.files_written);
        if self.conflicts > 0 {
            warn!("{} conflicting inferences were dropped", self.conflicts);
        }
        for skipped in &self.skipped {
            warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
        }
    }
}
