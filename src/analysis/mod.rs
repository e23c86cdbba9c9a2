//! Call-site analysis over vault field loads.
//!
//! Every `sget-object` of a vault field is a candidate site. Each registered
//! [`Detector`] inspects the site independently and may produce one
//! [`Finding`]; nothing here commits values, that happens in
//! [`crate::plan`].

pub mod field_updater;
pub mod lookup;
pub mod property;

use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::smali::{CompilationUnit, FieldDecl, FieldRef, Instruction};
use crate::vault::VaultSet;

pub use field_updater::FieldUpdaterDetector;
pub use lookup::ReflectiveLookupDetector;
pub use property::PropertyNameDetector;

pub const DEFAULT_LOOKAHEAD: usize = 10;
pub const DEFAULT_LOOKBEHIND: usize = 5;

/// Inference rules, in commit priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Rule {
    FieldUpdater,
    ReflectiveLookup,
    PropertyName,
    Override,
}

impl Rule {
    /// Lower wins when two rules disagree on a field.
    pub fn priority(self) -> u8 {
        match self {
            Rule::FieldUpdater => 0,
            Rule::ReflectiveLookup => 1,
            Rule::PropertyName => 2,
            Rule::Override => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub lookahead: usize,
    pub lookbehind: usize,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            lookahead: DEFAULT_LOOKAHEAD,
            lookbehind: DEFAULT_LOOKBEHIND,
        }
    }
}

/// Declared fields of every class in the tree.
#[derive(Debug, Clone, Default)]
pub struct ClassIndex {
    fields: HashMap<String, Vec<FieldDecl>>,
}

impl ClassIndex {
    pub fn build<'a>(units: impl IntoIterator<Item = &'a CompilationUnit>) -> Self {
        let fields = units
            .into_iter()
            .map(|u| (u.descriptor().to_string(), u.fields().cloned().collect()))
            .collect();
        Self { fields }
    }

    pub fn fields_of(&self, descriptor: &str) -> Option<&[FieldDecl]> {
        self.fields.get(descriptor).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Inferred(String),
    /// The site has a recognised shape but no unambiguous value.
    Unresolved(&'static str),
}

/// Everything a detector may look at for one vault load.
#[derive(Debug)]
pub struct SiteContext<'a> {
    pub unit: &'a CompilationUnit,
    /// Instructions of the enclosing method with their node indices.
    pub instructions: &'a [(usize, &'a Instruction)],
    /// Position of the vault load within `instructions`.
    pub position: usize,
    pub register: &'a str,
    pub field: &'a FieldRef,
    pub index: &'a ClassIndex,
    pub window: Window,
}

impl<'a> SiteContext<'a> {
    /// Up to `lookahead` instructions after the load.
    pub fn following(&self) -> &'a [(usize, &'a Instruction)] {
        let from = self.position + 1;
        let to = (from + self.window.lookahead).min(self.instructions.len());
        &self.instructions[from.min(to)..to]
    }

    /// Position of the earliest instruction a backward scan may reach.
    pub fn lookbehind_floor(&self) -> usize {
        self.position.saturating_sub(self.window.lookbehind)
    }

    /// Invocations inside the window that receive the loaded value, either
    /// directly or through `move-object` copies, paired with their positions.
    pub fn consumers(&self) -> Vec<(usize, &'a Instruction, Vec<String>)> {
        let mut live = vec![self.register.to_string()];
        let mut out = Vec::new();

        for (offset, (_, ins)) in self.following().iter().enumerate() {
            let position = self.position + 1 + offset;
            if ins.is_invoke() && ins.registers.iter().any(|r| live.contains(r)) {
                out.push((position, *ins, live.clone()));
            }
            if ins.opcode.starts_with("move-object")
                && ins.registers.len() == 2
                && live.contains(&ins.registers[1])
            {
                if !live.contains(&ins.registers[0]) {
                    live.push(ins.registers[0].clone());
                }
                continue;
            }
            if let Some(dst) = ins.destination() {
                live.retain(|r| r != dst);
            }
            if live.is_empty() {
                break;
            }
        }
        out
    }
}

/// One inference strategy over vault load sites.
pub trait Detector: Send + Sync {
    fn rule(&self) -> Rule;

    fn inspect(&self, site: &SiteContext<'_>) -> Option<Finding>;
}

/// A vault value flowing into a recognised consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionSite {
    pub unit: PathBuf,
    pub line: usize,
    pub register: String,
    pub vault_class: String,
    pub field: String,
    pub rule: Rule,
    pub value: Option<String>,
}

pub struct Analyzer {
    detectors: Vec<Box<dyn Detector>>,
    window: Window,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules: Vec<Rule> = self.detectors.iter().map(|d| d.rule()).collect();
        f.debug_struct("Analyzer")
            .field("rules", &rules)
            .field("window", &self.window)
            .finish()
    }
}

impl Analyzer {
    pub fn new(window: Window) -> Self {
        Self {
            detectors: vec![
                Box::new(FieldUpdaterDetector),
                Box::new(ReflectiveLookupDetector),
                Box::new(PropertyNameDetector),
            ],
            window,
        }
    }

    pub fn with_detectors(window: Window, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors, window }
    }

    pub fn analyze(
        &self,
        unit: &CompilationUnit,
        vaults: &VaultSet,
        index: &ClassIndex,
    ) -> Vec<ReflectionSite> {
        let mut sites = Vec::new();

        for method in unit.methods() {
            let instructions = method.instructions();
            for (position, (line, ins)) in instructions.iter().enumerate() {
                if !ins.opcode.starts_with("sget-object") {
                    continue;
                }
                let Some(field) = ins.field_ref() else { continue };
                if !vaults.contains_field(&field.class, &field.name) {
                    continue;
                }
                let Some(register) = ins.registers.first() else { continue };

                let site = SiteContext {
                    unit,
                    instructions: &instructions,
                    position,
                    register,
                    field: &field,
                    index,
                    window: self.window,
                };
                for detector in &self.detectors {
                    let Some(finding) = detector.inspect(&site) else { continue };
                    debug!(
                        "{}:{} {}->{} {:?}: {:?}",
                        unit.path().display(),
                        line + 1,
                        field.class,
                        field.name,
                        detector.rule(),
                        finding
                    );
                    sites.push(ReflectionSite {
                        unit: unit.path().to_path_buf(),
                        line: *line,
                        register: register.clone(),
                        vault_class: field.class.clone(),
                        field: field.name.clone(),
                        rule: detector.rule(),
                        value: match finding {
                            Finding::Inferred(v) => Some(v),
                            Finding::Unresolved(_) => None,
                        },
                    });
                }
            }
        }
        sites
    }
}
