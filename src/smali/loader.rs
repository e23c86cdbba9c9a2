use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::unit::CompilationUnit;
use crate::error::Result;

pub const SMALI_EXTENSION: &str = "smali";

/// Walks a decompiled tree and yields its compilation units.
#[derive(Debug, Clone)]
pub struct UnitLoader {
    root: PathBuf,
}

impl UnitLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All smali files under the root, in a stable (sorted) order.
    pub fn discover(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    None
                }
            })
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == SMALI_EXTENSION)
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    pub fn load(path: &Path) -> Result<CompilationUnit> {
        let text = std::fs::read_to_string(path)?;
        debug!("Parsing {}", path.display());
        CompilationUnit::parse(path, &text)
    }

    /// Lazily parses every unit, logging and skipping files that fail.
    pub fn units(&self) -> impl Iterator<Item = CompilationUnit> {
        self.discover()
            .into_iter()
            .filter_map(|path| match Self::load(&path) {
                Ok(unit) => Some(unit),
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    None
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skips_malformed_files_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("smali/com/example");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("Good.smali"), ".class public Lcom/example/Good;\n").unwrap();
        fs::write(pkg.join("Bad.smali"), ".method public f()V\n").unwrap();
        fs::write(pkg.join("notes.txt"), "not smali").unwrap();

        let loader = UnitLoader::new(dir.path());
        assert_eq!(loader.discover().len(), 2);
        let units: Vec<_> = loader.units().collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].descriptor(), "Lcom/example/Good;");
    }
}
