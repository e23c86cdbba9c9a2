//! Reconciles an asset manifest with the path prefix a native binary expects.
//!
//! When the compiled code looks assets up under a prefix the manifest does
//! not use, every manifest entry is mirrored under that prefix. Originals are
//! kept, so the change is undone by deleting the added keys.

use log::{debug, info};
use serde_json::{Map, Value};
use std::path::Path;

use crate::binary::NativeBinary;
use crate::error::{Error, Result};

pub const DEFAULT_ASSET_PREFIX: &str = "flutter_assets/";

/// Plain view of one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifestEntry {
    pub key: String,
    pub paths: Vec<String>,
}

/// Asset manifest JSON, kept in its original key order.
#[derive(Debug, Clone)]
pub struct AssetManifest {
    entries: Map<String, Value>,
    pretty: bool,
    trailing_newline: bool,
}

impl AssetManifest {
    pub fn parse(text: &str) -> Result<Self> {
        let Value::Object(entries) = serde_json::from_str::<Value>(text)? else {
            return Err(Error::ManifestShape("top level is not an object".into()));
        };
        if let Some((key, _)) = entries.iter().find(|(_, v)| !v.is_array()) {
            return Err(Error::ManifestShape(format!("entry {key:?} is not a list")));
        }
        Ok(Self {
            entries,
            pretty: text.trim_end().contains('\n'),
            trailing_newline: text.ends_with('\n'),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut text = if self.pretty {
            serde_json::to_string_pretty(&self.entries)?
        } else {
            serde_json::to_string(&self.entries)?
        };
        if self.trailing_newline {
            text.push('\n');
        }
        Ok(text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<AssetManifestEntry> {
        self.entries
            .iter()
            .map(|(key, value)| AssetManifestEntry {
                key: key.clone(),
                paths: value
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(asset_path)
                    .map(str::to_string)
                    .collect(),
            })
            .collect()
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.entries.keys().any(|k| k.starts_with(prefix))
    }

    /// Adds a prefixed copy of every entry; returns the number of keys added.
    pub fn mirror_under(&mut self, prefix: &str) -> usize {
        let mirrored: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|(key, _)| !key.starts_with(prefix))
            .map(|(key, value)| (format!("{prefix}{key}"), prefix_value(value, prefix)))
            .collect();

        let mut added = 0;
        for (key, value) in mirrored {
            if self.entries.contains_key(&key) {
                continue;
            }
            debug!("Mirroring asset entry {key}");
            self.entries.insert(key, value);
            added += 1;
        }
        added
    }
}

fn asset_path(value: &Value) -> Option<&str> {
    match value {
        Value::String(path) => Some(path.as_str()),
        Value::Object(obj) => obj.get("asset").and_then(Value::as_str),
        _ => None,
    }
}

fn prefix_value(value: &Value, prefix: &str) -> Value {
    let prefixed = |path: &str| {
        if path.starts_with(prefix) {
            path.to_string()
        } else {
            format!("{prefix}{path}")
        }
    };
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| prefix_value(v, prefix)).collect()),
        Value::String(path) => Value::String(prefixed(path.as_str())),
        Value::Object(obj) => {
            let mut obj = obj.clone();
            if let Some(Value::String(path)) = obj.get("asset") {
                let path = prefixed(path.as_str());
                obj.insert("asset".into(), Value::String(path));
            }
            Value::Object(obj)
        }
        other => other.clone(),
    }
}

/// Mirrors the manifest under `prefix` when the binary references the prefix
/// and the manifest has no entry using it yet.
pub fn reconcile(binary: &NativeBinary, manifest: &mut AssetManifest, prefix: &str) -> Result<usize> {
    if prefix.is_empty() || !binary.string_pool_contains(prefix.as_bytes())? {
        debug!("Binary does not reference {prefix:?}");
        return Ok(0);
    }
    if manifest.has_prefix(prefix) {
        debug!("Manifest already has entries under {prefix:?}");
        return Ok(0);
    }
    Ok(manifest.mirror_under(prefix))
}

/// File-level [`reconcile`]; the manifest is only rewritten when entries were added.
pub fn reconcile_files(binary: &Path, manifest: &Path, prefix: &str) -> Result<usize> {
    let native = NativeBinary::from_file(binary)?;
    let mut parsed = AssetManifest::from_file(manifest)?;
    let added = reconcile(&native, &mut parsed, prefix)?;
    if added > 0 {
        std::fs::write(manifest, parsed.to_json()?)?;
        info!("✓ Added {added} asset entries under {prefix:?} to {}", manifest.display());
    }
    Ok(added)
}
