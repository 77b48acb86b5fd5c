// Incremental state (`cache.json`).
//
// A module is skipped when none of its source files changed, the manifests
// it was woven against still have the same fingerprints, and its manifest is
// still on disk. The cache is advisory: a missing or corrupt file means
// everything is rewoven.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{WeaveError, WeaveResult};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleState {
    /// Source file -> modification time in nanoseconds since the epoch.
    pub files: BTreeMap<PathBuf, u64>,
    /// Fingerprint of the manifest the weave produced.
    pub exported: u64,
    /// Fingerprints of the manifests the module was woven against.
    #[serde(default)]
    pub dependencies: BTreeMap<String, u64>,
}

impl ModuleState {
    /// Every recorded source still has its recorded modification time.
    ///
    /// New files only enter a crate through a `mod` item in an existing file,
    /// so changed file sets show up as a changed file.
    pub fn sources_unchanged(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|(path, time)| modified(path) == Some(*time))
    }
}

/// Modification time of `path`, `None` when it cannot be read.
pub fn modified(path: &Path) -> Option<u64> {
    let time = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let since = time.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(since.as_nanos()).ok()
}

/// Current modification times of `paths`.
pub fn snapshot<'a>(paths: impl IntoIterator<Item = &'a Path>) -> BTreeMap<PathBuf, u64> {
    paths
        .into_iter()
        .filter_map(|p| modified(p).map(|t| (p.to_path_buf(), t)))
        .collect()
}

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    #[serde(default)]
    modules: BTreeMap<String, ModuleState>,
}

pub struct Cache {
    path: PathBuf,
    modules: BTreeMap<String, ModuleState>,
}

impl Cache {
    pub fn load(path: &Path) -> Cache {
        let modules = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) => file.modules,
                Err(e) => {
                    log::warn!("{}: discarding corrupt weave cache: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Cache {
            path: path.to_path_buf(),
            modules,
        }
    }

    pub fn get(&self, module: &str) -> Option<&ModuleState> {
        self.modules.get(module)
    }

    pub fn record(&mut self, module: &str, state: ModuleState) {
        self.modules.insert(module.to_string(), state);
    }

    pub fn forget(&mut self, module: &str) {
        self.modules.remove(module);
    }

    pub fn save(&self) -> WeaveResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WeaveError::io(dir, e))?;
        }
        let file = CacheFile {
            modules: self.modules.clone(),
        };
        let text = serde_json::to_string_pretty(&file).map_err(|e| WeaveError::Manifest {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, text).map_err(|e| WeaveError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("lib.rs");
        std::fs::write(&source, "pub fn f() {}").unwrap();

        let path = dir.path().join("target/cache.json");
        let mut cache = Cache::load(&path);
        assert!(cache.get("Game").is_none());
        let state = ModuleState {
            files: snapshot([source.as_path()]),
            exported: 7,
            dependencies: BTreeMap::from([("Core".to_string(), 3)]),
        };
        cache.record("Game", state.clone());
        cache.save().unwrap();

        let reloaded = Cache::load(&path);
        assert_eq!(reloaded.get("Game"), Some(&state));
        assert!(state.sources_unchanged());
    }

    #[test]
    fn corrupt_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(Cache::load(&path).get("Game").is_none());
    }

    #[test]
    fn removed_or_touched_sources_are_changes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("lib.rs");
        std::fs::write(&source, "").unwrap();
        let mut state = ModuleState {
            files: snapshot([source.as_path()]),
            ..Default::default()
        };
        assert!(state.sources_unchanged());

        // A recorded time that no longer matches.
        if let Some(time) = state.files.values_mut().next() {
            *time += 1;
        }
        assert!(!state.sources_unchanged());

        std::fs::remove_file(&source).unwrap();
        assert!(!ModuleState::default().sources_unchanged());
        assert!(!state.sources_unchanged());
    }
}
