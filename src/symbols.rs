use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use crate::binary::NativeBinary;
use crate::error::{Error, Result};

/// Exported function names of a native binary, ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolSet(BTreeSet<String>);

impl SymbolSet {
    pub fn from_binary(binary: &NativeBinary) -> Result<Self> {
        Ok(Self(binary.exported_functions()?))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_binary(&NativeBinary::from_file(path)?)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Names present here and absent from `other`.
    pub fn difference(&self, other: &SymbolSet) -> Vec<String> {
        self.0.difference(&other.0).cloned().collect()
    }

    pub fn is_compatible(&self, other: &SymbolSet) -> bool {
        self == other
    }
}

impl FromIterator<String> for SymbolSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Gate for substituting `replacement` in place of `original`: both must
/// export exactly the same functions.
pub fn verify(original: &NativeBinary, replacement: &NativeBinary) -> Result<()> {
    let expected = SymbolSet::from_binary(original)?;
    let actual = SymbolSet::from_binary(replacement)?;
    check(&expected, &actual)
}

pub fn verify_files(original: &Path, replacement: &Path) -> Result<()> {
    info!(
        "→ Comparing exports of {} and {}",
        original.display(),
        replacement.display()
    );
    verify(
        &NativeBinary::from_file(original)?,
        &NativeBinary::from_file(replacement)?,
    )
}

pub fn check(expected: &SymbolSet, actual: &SymbolSet) -> Result<()> {
    if expected.is_compatible(actual) {
        info!("✓ {} exported functions match", expected.len());
        return Ok(());
    }

    let missing = expected.difference(actual);
    let unexpected = actual.difference(expected);
    for name in &missing {
        warn!("Missing export: {name}");
    }
    for name in &unexpected {
        warn!("Unexpected export: {name}");
    }
    Err(Error::SymbolMismatch {
        missing,
        unexpected,
    })
}
