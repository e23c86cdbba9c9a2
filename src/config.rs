use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::analysis::{Window, DEFAULT_LOOKAHEAD, DEFAULT_LOOKBEHIND};
use crate::assets::DEFAULT_ASSET_PREFIX;
use crate::error::{Error, Result};
use crate::patch::GuardConfig;
use crate::plan::OverrideTable;
use crate::vault::{VaultSignature, MAX_VAULT_METHODS, MIN_VAULT_FIELDS};

pub const CONFIG_FILE_NAMES: &[&str] = &["unvault.json", "unvault.config.json"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnvaultConfig {
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
    #[serde(default = "default_lookbehind")]
    pub lookbehind: usize,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub overrides: OverrideTable,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub assets: AssetConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    pub min_fields: Option<usize>,
    pub max_methods: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetConfig {
    #[serde(default = "default_asset_prefix")]
    pub prefix: String,
    /// Native binary whose string pool is searched for `prefix`.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

fn default_lookahead() -> usize {
    DEFAULT_LOOKAHEAD
}

fn default_lookbehind() -> usize {
    DEFAULT_LOOKBEHIND
}

fn default_asset_prefix() -> String {
    DEFAULT_ASSET_PREFIX.to_string()
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            prefix: default_asset_prefix(),
            binary: None,
            manifest: None,
        }
    }
}

impl Default for UnvaultConfig {
    fn default() -> Self {
        Self {
            lookahead: DEFAULT_LOOKAHEAD,
            lookbehind: DEFAULT_LOOKBEHIND,
            vault: VaultConfig::default(),
            overrides: OverrideTable::default(),
            guard: GuardConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl UnvaultConfig {
    pub fn template() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(
            "Lcom/example/Strings;".to_string(),
            BTreeMap::from([("a".to_string(), "com.example.Impl".to_string())]),
        );

        Self {
            vault: VaultConfig {
                min_fields: Some(MIN_VAULT_FIELDS),
                max_methods: Some(MAX_VAULT_METHODS),
            },
            overrides: OverrideTable {
                version: 1,
                classes,
            },
            assets: AssetConfig {
                binary: Some(PathBuf::from("lib/arm64-v8a/libapp.so")),
                manifest: Some(PathBuf::from("assets/flutter_assets/AssetManifest.json")),
                ..AssetConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = json5::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file; relative asset paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::parse(&std::fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or(Path::new("."));
        for slot in [&mut config.assets.binary, &mut config.assets.manifest] {
            if let Some(p) = slot.as_mut().filter(|p| p.is_relative()) {
                *p = base.join(&*p);
            }
        }
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lookahead == 0 {
            return Err(Error::Config("lookahead must be at least 1".into()));
        }
        if let Some(hook) = &self.guard.hook {
            if !hook.contains("->") || !hook.ends_with("(Ljava/lang/Throwable;)V") {
                return Err(Error::Config(format!(
                    "guard hook must be a static (Ljava/lang/Throwable;)V method reference: {hook}"
                )));
            }
        }
        Ok(())
    }

    pub fn window(&self) -> Window {
        Window {
            lookahead: self.lookahead,
            lookbehind: self.lookbehind,
        }
    }

    pub fn vault_signature(&self) -> VaultSignature {
        let defaults = VaultSignature::default();
        VaultSignature {
            min_fields: self.vault.min_fields.unwrap_or(defaults.min_fields),
            max_methods: self.vault.max_methods.unwrap_or(defaults.max_methods),
        }
    }
}

/// Finds a config file in `start_dir` or any of its parents.
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    start_dir.ancestors().find_map(|dir| {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json5_with_defaults() {
        let config = UnvaultConfig::parse(
            r#"{
                // tuned for the test fixture
                lookahead: 8,
                vault: { minFields: 2 },
                overrides: { version: 3, classes: { "LV;": { a: "x" } } },
                guard: { targets: [{ name: "run" }], exclude: ["Landroidx/"] },
            }"#,
        )
        .unwrap();
        assert_eq!(config.window().lookahead, 8);
        assert_eq!(config.window().lookbehind, DEFAULT_LOOKBEHIND);
        assert_eq!(config.vault_signature().min_fields, 2);
        assert_eq!(config.vault_signature().max_methods, MAX_VAULT_METHODS);
        assert_eq!(config.overrides.get("LV;", "a"), Some("x"));
        assert_eq!(config.guard.targets[0].name.as_deref(), Some("run"));
        assert!(config.guard.excludes("Landroidx/core/Foo;"));
        assert_eq!(config.assets.prefix, DEFAULT_ASSET_PREFIX);
    }

    #[test]
    fn rejects_bad_hook() {
        let err = UnvaultConfig::parse(r#"{ guard: { hook: "Lcom/a/B;->log()V" } }"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn template_round_trips_and_is_discoverable() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("smali/com/app");
        std::fs::create_dir_all(&nested).unwrap();
        let path = dir.path().join("unvault.json");
        std::fs::write(&path, serde_json::to_string_pretty(&UnvaultConfig::template()).unwrap()).unwrap();

        assert_eq!(find_config_file(&nested), Some(path.clone()));
        let loaded = UnvaultConfig::load(&path).unwrap();
        assert_eq!(loaded.overrides.version, 1);
        assert_eq!(
            loaded.assets.binary,
            Some(dir.path().join("lib/arm64-v8a/libapp.so"))
        );
    }
}
