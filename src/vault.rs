//! Recognition of string-vault classes.
//!
//! A vault holds many static `String` fields that the protection runtime
//! fills in at startup. After patching, the unit carries a generated
//! initializer tagged with [`GENERATED_MARKER`]; the classifier looks through
//! that initializer so re-runs keep recognising the class.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::smali::{CompilationUnit, LineKind, Method};

/// A unit needs strictly more static string fields than this.
pub const MIN_VAULT_FIELDS: usize = 20;
/// Upper bound on hand-written methods in a vault.
pub const MAX_VAULT_METHODS: usize = 2;
/// Comment line placed inside every initializer this crate generates.
pub const GENERATED_MARKER: &str = "# unvault: generated initializer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultSignature {
    pub min_fields: usize,
    pub max_methods: usize,
}

impl Default for VaultSignature {
    fn default() -> Self {
        Self {
            min_fields: MIN_VAULT_FIELDS,
            max_methods: MAX_VAULT_METHODS,
        }
    }
}

impl VaultSignature {
    pub fn classify(&self, unit: &CompilationUnit) -> bool {
        let string_fields = unit
            .fields()
            .filter(|f| f.is_static() && f.is_string())
            .count();
        if string_fields <= self.min_fields || unit.has_source_marker() {
            return false;
        }

        let methods: Vec<Method<'_>> = unit.methods().filter(|m| !is_generated(m)).collect();
        methods.len() <= self.max_methods && !has_string_literals(unit, &methods)
    }
}

/// A vault carries no string literal of its own: no `const-string` in a
/// hand-written method and no field declared with a constant value.
fn has_string_literals(unit: &CompilationUnit, methods: &[Method<'_>]) -> bool {
    unit.fields().any(|f| f.has_initial_value)
        || methods.iter().any(|m| {
            m.body().iter().any(|l| {
                matches!(l.kind(), LineKind::Instruction(ins) if ins.opcode.starts_with("const-string"))
            })
        })
}

pub fn is_generated(method: &Method<'_>) -> bool {
    method.contains_comment(GENERATED_MARKER)
}

/// A classified vault and its static string fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultClass {
    pub descriptor: String,
    pub path: PathBuf,
    pub fields: Vec<String>,
}

impl VaultClass {
    pub fn from_unit(unit: &CompilationUnit) -> Self {
        Self {
            descriptor: unit.descriptor().to_string(),
            path: unit.path().to_path_buf(),
            fields: unit
                .fields()
                .filter(|f| f.is_static() && f.is_string())
                .map(|f| f.name.clone())
                .collect(),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

/// All vault classes of a tree, keyed by descriptor.
#[derive(Debug, Clone, Default)]
pub struct VaultSet {
    classes: BTreeMap<String, VaultClass>,
}

impl VaultSet {
    pub fn insert(&mut self, vault: VaultClass) {
        self.classes.insert(vault.descriptor.clone(), vault);
    }

    pub fn get(&self, descriptor: &str) -> Option<&VaultClass> {
        self.classes.get(descriptor)
    }

    pub fn contains_field(&self, descriptor: &str, field: &str) -> bool {
        self.get(descriptor).is_some_and(|v| v.has_field(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VaultClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<VaultClass> for VaultSet {
    fn from_iter<I: IntoIterator<Item = VaultClass>>(iter: I) -> Self {
        let mut set = Self::default();
        for vault in iter {
            set.insert(vault);
        }
        set
    }
}
