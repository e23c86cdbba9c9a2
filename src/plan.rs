//! Aggregation of detector findings into one committed value per vault field.
//!
//! This is the single barrier between analysis and patching: every site of
//! the tree is collected first, then sorted by rule priority and source
//! position, so the outcome does not depend on directory-walk or thread order.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::analysis::{ReflectionSite, Rule};
use crate::vault::VaultSet;

/// Known-good vault values maintained by hand, consulted only for fields no
/// detector resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideTable {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub classes: BTreeMap<String, BTreeMap<String, String>>,
}

impl OverrideTable {
    pub fn get(&self, class: &str, field: &str) -> Option<&str> {
        self.classes.get(class)?.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.values().all(BTreeMap::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRef {
    pub unit: PathBuf,
    pub line: usize,
}

/// A committed value for one vault field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRecord {
    pub class: String,
    pub field: String,
    pub value: String,
    pub origin: Rule,
    /// Vault unit the value is written into.
    pub target: PathBuf,
    /// Call site that produced the value; `None` for overrides.
    pub site: Option<SiteRef>,
}

type FieldKey = (String, String);

#[derive(Debug, Clone, Default)]
pub struct PatchPlan {
    records: BTreeMap<FieldKey, PatchRecord>,
    unresolved: BTreeSet<FieldKey>,
    conflicts: usize,
}

impl PatchPlan {
    pub fn aggregate(
        mut sites: Vec<ReflectionSite>,
        vaults: &VaultSet,
        overrides: &OverrideTable,
    ) -> Self {
        sites.sort_by(|a, b| {
            (a.rule.priority(), &a.unit, a.line).cmp(&(b.rule.priority(), &b.unit, b.line))
        });

        let mut plan = Self::default();
        let mut seen = BTreeSet::new();

        for site in sites {
            let Some(vault) = vaults.get(&site.vault_class) else { continue };
            let key = (site.vault_class.clone(), site.field.clone());
            seen.insert(key.clone());
            let Some(value) = site.value else { continue };

            match plan.records.get(&key) {
                Some(existing) if existing.value != value => {
                    plan.conflicts += 1;
                    warn!(
                        "Conflicting values for {}->{}: kept {:?} ({:?}), dropped {:?} ({:?} at {}:{})",
                        key.0,
                        key.1,
                        existing.value,
                        existing.origin,
                        value,
                        site.rule,
                        site.unit.display(),
                        site.line + 1
                    );
                }
                Some(_) => {}
                None => {
                    debug!("Commit {}->{} = {:?} ({:?})", key.0, key.1, value, site.rule);
                    plan.records.insert(
                        key.clone(),
                        PatchRecord {
                            class: key.0.clone(),
                            field: key.1.clone(),
                            value,
                            origin: site.rule,
                            target: vault.path.clone(),
                            site: Some(SiteRef {
                                unit: site.unit,
                                line: site.line,
                            }),
                        },
                    );
                }
            }
        }

        for vault in vaults.iter() {
            for field in &vault.fields {
                let key = (vault.descriptor.clone(), field.clone());
                if plan.records.contains_key(&key) {
                    continue;
                }
                if let Some(value) = overrides.get(&vault.descriptor, field) {
                    plan.records.insert(
                        key.clone(),
                        PatchRecord {
                            class: key.0,
                            field: key.1,
                            value: value.to_string(),
                            origin: Rule::Override,
                            target: vault.path.clone(),
                            site: None,
                        },
                    );
                }
            }
        }

        plan.unresolved = seen
            .into_iter()
            .filter(|key| !plan.records.contains_key(key))
            .collect();
        plan
    }

    pub fn get(&self, class: &str, field: &str) -> Option<&PatchRecord> {
        self.records.get(&(class.to_string(), field.to_string()))
    }

    pub fn records(&self) -> impl Iterator<Item = &PatchRecord> {
        self.records.values()
    }

    pub fn count_by(&self, origin: Rule) -> usize {
        self.records().filter(|r| r.origin == origin).count()
    }

    /// Fields with recognised sites but no committed value.
    pub fn unresolved(&self) -> usize {
        self.unresolved.len()
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }
}
