use log::{info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::analysis::{Analyzer, ClassIndex, ReflectionSite, Rule};
use crate::assets;
use crate::binary::NativeBinary;
use crate::config::UnvaultConfig;
use crate::error::Result;
use crate::patch::{guard, initializer};
use crate::plan::PatchPlan;
use crate::report::{Commit, PatchReport};
use crate::smali::{CompilationUnit, UnitLoader};
use crate::vault::{VaultClass, VaultSet};

/// Runs the full analysis and patch pipeline over a decompiled tree.
#[derive(Debug, Clone)]
pub struct Patcher {
    config: UnvaultConfig,
    dry_run: bool,
}

/// What patching did to one unit.
#[derive(Debug, Default)]
struct UnitOutcome {
    initializer: Option<initializer::InitializerOutcome>,
    injected: usize,
    written: bool,
    skipped: Vec<String>,
}

impl Patcher {
    pub fn new(config: UnvaultConfig) -> Self {
        Self {
            config,
            dry_run: false,
        }
    }

    /// Computes the full report without touching the tree.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &UnvaultConfig {
        &self.config
    }

    pub fn run(&self, root: &Path) -> Result<PatchReport> {
        let mut report = PatchReport::default();
        let loader = UnitLoader::new(root);

        info!("→ Loading units from {}", root.display());
        let paths = loader.discover();
        let loaded: Vec<_> = paths
            .par_iter()
            .map(|path| (path, UnitLoader::load(path)))
            .collect();

        let mut units = Vec::with_capacity(loaded.len());
        for (path, result) in loaded {
            match result {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    report.skip(path, e.to_string());
                }
            }
        }
        report.units_scanned = units.len();

        let signature = self.config.vault_signature();
        let vaults: VaultSet = units
            .par_iter()
            .filter(|unit| signature.classify(unit))
            .map(VaultClass::from_unit)
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        info!("→ Found {} vault classes", vaults.len());

        let index = ClassIndex::build(&units);
        let analyzer = Analyzer::new(self.config.window());
        // Aggregation barrier: every site is known before anything is written.
        let sites: Vec<ReflectionSite> = units
            .par_iter()
            .flat_map_iter(|unit| analyzer.analyze(unit, &vaults, &index))
            .collect();
        info!("→ Analysed {} vault call sites", sites.len());

        let plan = PatchPlan::aggregate(sites, &vaults, &self.config.overrides);
        report.reflection_inferred = plan.count_by(Rule::FieldUpdater);
        report.property_inferred = plan.count_by(Rule::PropertyName);
        report.override_applied = plan.count_by(Rule::Override);
        report.unresolved = plan.unresolved();
        report.conflicts = plan.conflicts();
        report.commits = plan
            .records()
            .map(|r| Commit {
                class: r.class.clone(),
                field: r.field.clone(),
                value: r.value.clone(),
                origin: r.origin,
            })
            .collect();

        let outcomes: Vec<(PathBuf, UnitOutcome)> = units
            .par_iter_mut()
            .map(|unit| {
                let is_vault = vaults.get(unit.descriptor()).is_some();
                (unit.path().to_path_buf(), self.patch_unit(unit, is_vault, &plan))
            })
            .collect();

        for (path, outcome) in outcomes {
            if let Some(init) = outcome.initializer {
                report.vault_classes_initialized += 1;
                report.defaults += init.defaults;
            }
            report.exception_regions_injected += outcome.injected;
            report.files_written += usize::from(outcome.written);
            for reason in outcome.skipped {
                report.skip(&path, reason);
            }
        }

        self.reconcile_assets(&mut report);

        info!(
            "✓ Patched {} ({} files written)",
            root.display(),
            report.files_written
        );
        Ok(report)
    }

    fn patch_unit(
        &self,
        unit: &mut CompilationUnit,
        is_vault: bool,
        plan: &PatchPlan,
    ) -> UnitOutcome {
        let mut outcome = UnitOutcome::default();

        if is_vault {
            match initializer::apply(unit, plan) {
                Ok(init) => outcome.initializer = Some(init),
                Err(e) => {
                    warn!("{}: initializer not generated: {e}", unit.path().display());
                    outcome.skipped.push(format!("initializer: {e}"));
                }
            }
        }

        match guard::apply(unit, &self.config.guard) {
            Ok(guarded) => {
                outcome.injected = guarded.injected;
                outcome.skipped.extend(guarded.skipped);
            }
            Err(e) => {
                warn!("{}: exception regions not injected: {e}", unit.path().display());
                outcome.skipped.push(format!("guard: {e}"));
            }
        }

        if unit.is_changed() && !self.dry_run {
            match std::fs::write(unit.path(), unit.render()) {
                Ok(()) => outcome.written = true,
                Err(e) => {
                    warn!("Failed to write {}: {e}", unit.path().display());
                    outcome.skipped.push(format!("write: {e}"));
                }
            }
        } else if unit.is_changed() {
            outcome.written = true;
        }
        outcome
    }

    fn reconcile_assets(&self, report: &mut PatchReport) {
        let assets = &self.config.assets;
        let (Some(binary), Some(manifest)) = (&assets.binary, &assets.manifest) else {
            return;
        };

        let result = if self.dry_run {
            NativeBinary::from_file(binary).and_then(|native| {
                let mut parsed = assets::AssetManifest::from_file(manifest)?;
                assets::reconcile(&native, &mut parsed, &assets.prefix)
            })
        } else {
            assets::reconcile_files(binary, manifest, &assets.prefix)
        };

        match result {
            Ok(added) => report.asset_entries_added = added,
            Err(e) => {
                warn!("Asset reconciliation skipped: {e}");
                report.skip(manifest, e.to_string());
            }
        }
    }
}
