// Configuration types for the weaver, deserialized from umbra.config.toml.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{WeaveError, WeaveResult};

/// Top-level config file.
#[derive(Deserialize, Debug, Clone)]
pub struct UmbraConfig {
    #[serde(default)]
    pub weaver: WeaverConfig,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
    /// Manifests of types the script modules build on (engine classes and structs).
    #[serde(default, rename = "external")]
    pub externals: Vec<ExternalConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WeaverConfig {
    /// Directory receiving `<Module>.manifest.json` and `index.json`.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
    /// Incremental state file.
    #[serde(default = "default_cache")]
    pub cache: PathBuf,
    /// Pipe woven sources through rustfmt when it is installed.
    #[serde(default = "default_format")]
    pub format: bool,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        WeaverConfig {
            manifest_dir: default_manifest_dir(),
            cache: default_cache(),
            format: default_format(),
        }
    }
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from("target/umbra/manifests")
}

fn default_cache() -> PathBuf {
    PathBuf::from("target/umbra/cache.json")
}

fn default_format() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModuleConfig {
    /// Assembly name; also the prefix of every full type name (`Game.Turret`).
    pub name: String,
    /// Script crate `src` directory (must contain `lib.rs`).
    pub source: PathBuf,
    /// Directory receiving the woven sources.
    pub output: PathBuf,
    /// Native package the module's types are registered under.
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ModuleConfig {
    pub fn package(&self) -> String {
        self.package
            .clone()
            .unwrap_or_else(|| format!("/Script/{}", self.name))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExternalConfig {
    pub name: String,
    pub manifest: PathBuf,
}

impl UmbraConfig {
    /// Load a config file and resolve every path relative to its directory.
    pub fn load(path: &Path) -> WeaveResult<UmbraConfig> {
        let text = std::fs::read_to_string(path).map_err(|e| WeaveError::io(path, e))?;
        let mut config: UmbraConfig = toml::from_str(&text).map_err(|e| WeaveError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(base);
        config.check(path)?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.weaver.manifest_dir);
        join(&mut self.weaver.cache);
        for m in &mut self.modules {
            join(&mut m.source);
            join(&mut m.output);
        }
        for e in &mut self.externals {
            join(&mut e.manifest);
        }
    }

    fn check(&self, path: &Path) -> WeaveResult<()> {
        let mut seen = std::collections::HashSet::new();
        for m in &self.modules {
            if !seen.insert(m.name.as_str()) {
                return Err(WeaveError::Config {
                    path: path.to_path_buf(),
                    message: format!("module `{}` is declared twice", m.name),
                });
            }
        }
        for m in &self.modules {
            for dep in &m.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(WeaveError::UnknownDependency {
                        module: m.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.name == name)
    }
}
