// Manifest files: `<Module>.manifest.json` per module plus `index.json`.
//
// A manifest is what downstream modules see of a module: its reflected
// types with their native names and flags. The index lists every manifest in
// the directory with a fingerprint of its contents.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{WeaveError, WeaveResult};
use crate::model::ModuleManifest;
use crate::naming::fnv1a_hash;

pub const INDEX_FILE: &str = "index.json";

pub fn manifest_path(dir: &Path, module: &str) -> PathBuf {
    dir.join(format!("{module}.manifest.json"))
}

/// Fingerprint of everything a manifest exports. Dependents are rewoven when
/// it changes.
pub fn fingerprint(manifest: &ModuleManifest) -> u64 {
    fnv1a_hash(&serde_json::to_string(manifest).unwrap_or_default())
}

pub fn read_manifest(path: &Path) -> WeaveResult<ModuleManifest> {
    let text = std::fs::read_to_string(path).map_err(|e| WeaveError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| WeaveError::Manifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn write_manifest(dir: &Path, manifest: &ModuleManifest) -> WeaveResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| WeaveError::io(dir, e))?;
    let path = manifest_path(dir, &manifest.module);
    let text = serde_json::to_string_pretty(manifest).map_err(|e| WeaveError::Manifest {
        path: path.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(&path, text).map_err(|e| WeaveError::io(&path, e))?;
    Ok(path)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub module: String,
    pub package: String,
    /// File name relative to the manifest directory.
    pub manifest: String,
    pub types: usize,
    /// Hex fingerprint of the manifest.
    pub fingerprint: String,
}

impl IndexEntry {
    pub fn new(manifest: &ModuleManifest) -> Self {
        IndexEntry {
            module: manifest.module.clone(),
            package: manifest.package.clone(),
            manifest: format!("{}.manifest.json", manifest.module),
            types: manifest.type_count(),
            fingerprint: format!("{:016x}", fingerprint(manifest)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestIndex {
    pub modules: Vec<IndexEntry>,
}

impl ManifestIndex {
    /// Existing index of `dir`; a missing or unreadable index is empty.
    pub fn load(dir: &Path) -> ManifestIndex {
        let path = dir.join(INDEX_FILE);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return ManifestIndex::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!("{}: ignoring unreadable index: {e}", path.display());
            ManifestIndex::default()
        })
    }

    /// Insert or replace the entry of `manifest.module`.
    pub fn update(&mut self, manifest: &ModuleManifest) {
        let entry = IndexEntry::new(manifest);
        match self.modules.iter_mut().find(|e| e.module == entry.module) {
            Some(existing) => *existing = entry,
            None => self.modules.push(entry),
        }
        self.modules.sort_by(|a, b| a.module.cmp(&b.module));
    }

    pub fn write(&self, dir: &Path) -> WeaveResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| WeaveError::io(dir, e))?;
        let path = dir.join(INDEX_FILE);
        let text = serde_json::to_string_pretty(self).map_err(|e| WeaveError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, text).map_err(|e| WeaveError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnumMeta, EnumVariantMeta};

    fn manifest(module: &str) -> ModuleManifest {
        ModuleManifest {
            module: module.into(),
            package: format!("/Script/{module}"),
            enums: vec![EnumMeta {
                name: "Mode".into(),
                full_name: format!("{module}.Mode"),
                underlying: "u8".into(),
                variants: vec![EnumVariantMeta { name: "Idle".into(), value: 0 }],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn manifests_survive_the_disk() {
        let dir = tempfile::tempdir().unwrap();
        let written = manifest("Game");
        let path = write_manifest(dir.path(), &written).unwrap();
        assert_eq!(path, dir.path().join("Game.manifest.json"));
        assert_eq!(read_manifest(&path).unwrap(), written);
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bad.manifest.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_manifest(&path), Err(WeaveError::Manifest { .. })));
    }

    #[test]
    fn index_entries_are_replaced_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ManifestIndex::load(dir.path());
        assert!(index.modules.is_empty());
        index.update(&manifest("Game"));
        index.update(&manifest("Core"));
        let mut changed = manifest("Game");
        changed.enums.clear();
        index.update(&changed);
        index.write(dir.path()).unwrap();

        let loaded = ManifestIndex::load(dir.path());
        let names: Vec<_> = loaded.modules.iter().map(|e| e.module.as_str()).collect();
        assert_eq!(names, ["Core", "Game"]);
        assert_eq!(loaded.modules[1].types, 0);
        assert_eq!(loaded.modules[1].fingerprint, format!("{:016x}", fingerprint(&changed)));
    }

    #[test]
    fn fingerprint_tracks_exports() {
        let a = manifest("Game");
        let mut b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        b.enums[0].variants[0].value = 1;
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
