// Weave driver: schedules modules by dependency level, weaves each level in
// parallel, and writes outputs, manifests, the index and the cache.
//
// Syntax trees never leave the thread weaving their module; only manifests,
// cache state and errors cross back.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::classify::analyze;
use crate::config::{ModuleConfig, UmbraConfig};
use crate::emit;
use crate::error::{WeaveError, WeaveResult};
use crate::incremental::{self, Cache, ModuleState};
use crate::manifest::{self, ManifestIndex};
use crate::model::ModuleManifest;
use crate::order;
use crate::parse;

#[derive(Debug, Clone, Default)]
pub struct WeaveOptions {
    /// Weave only this module; its dependencies are read from their manifests.
    pub only: Option<String>,
    /// Ignore the incremental cache.
    pub force: bool,
}

#[derive(Debug)]
pub enum ModuleOutcome {
    Woven { types: usize, files: usize },
    /// Analysed without writing anything.
    Checked { types: usize },
    UpToDate,
    Failed(WeaveError),
}

impl ModuleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ModuleOutcome::Failed(_))
    }
}

#[derive(Debug, Default)]
pub struct WeaveReport {
    /// In processing order.
    pub modules: Vec<(String, ModuleOutcome)>,
}

impl WeaveReport {
    pub fn failed(&self) -> usize {
        self.modules.iter().filter(|(_, o)| o.is_failure()).count()
    }

    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.modules.iter().find(|(m, _)| m == module).map(|(_, o)| o)
    }

    /// `Err(WeaveError::Failed)` when any module failed.
    pub fn into_result(self) -> WeaveResult<WeaveReport> {
        match self.failed() {
            0 => Ok(self),
            failed => Err(WeaveError::Failed {
                failed,
                total: self.modules.len(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Groups of modules that only depend on earlier groups.
fn levels<'c>(modules: &[&'c ModuleConfig]) -> WeaveResult<Vec<Vec<&'c ModuleConfig>>> {
    let index: HashMap<&str, usize> = modules.iter().enumerate().map(|(i, m)| (m.name.as_str(), i)).collect();
    let deps = |i: usize| -> Vec<usize> {
        modules[i]
            .dependencies
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .collect()
    };
    let order = order::dependency_first(modules.len(), &deps)
        .map_err(|i| WeaveError::ModuleCycle(modules[i].name.clone()))?;

    let mut level = vec![0usize; modules.len()];
    for &i in &order {
        level[i] = deps(i).into_iter().map(|d| level[d] + 1).max().unwrap_or(0);
    }
    let depth = level.iter().copied().max().map_or(0, |l| l + 1);
    let mut grouped: Vec<Vec<&ModuleConfig>> = vec![Vec::new(); depth];
    for &i in &order {
        grouped[level[i]].push(modules[i]);
    }
    Ok(grouped)
}

struct Job<'c> {
    module: &'c ModuleConfig,
    deps: Vec<ModuleManifest>,
    fingerprints: BTreeMap<String, u64>,
    cached: Option<ModuleState>,
}

struct Woven {
    manifest: ModuleManifest,
    state: Option<ModuleState>,
    outcome: ModuleOutcome,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write { force: bool, format: bool },
    Check,
}

fn up_to_date(job: &Job, manifest_dir: &Path) -> Option<ModuleManifest> {
    let state = job.cached.as_ref()?;
    if !state.sources_unchanged() || state.dependencies != job.fingerprints || !job.module.output.is_dir() {
        return None;
    }
    let manifest = manifest::read_manifest(&manifest::manifest_path(manifest_dir, &job.module.name)).ok()?;
    (manifest::fingerprint(&manifest) == state.exported).then_some(manifest)
}

fn weave_module(job: &Job, mode: Mode, manifest_dir: &Path) -> WeaveResult<Woven> {
    let module = job.module;
    if let Mode::Write { force: false, .. } = mode {
        if let Some(manifest) = up_to_date(job, manifest_dir) {
            log::info!("{}: up to date", module.name);
            return Ok(Woven {
                manifest,
                state: job.cached.clone(),
                outcome: ModuleOutcome::UpToDate,
            });
        }
    }

    log::info!("weaving {}", module.name);
    let files = parse::discover(&module.name, &module.source)?;
    let decls = parse::collect(&files)?;
    let authoring = |source| WeaveError::Authoring {
        module: module.name.clone(),
        source,
    };
    let analysis = analyze(&module.name, &decls, &job.deps).map_err(authoring)?;
    let woven = emit::emit(&module.name, &files, &decls, &analysis).map_err(authoring)?;
    let manifest = analysis.manifest(&module.name, &module.package(), &module.dependencies);
    let types = manifest.type_count();
    log::debug!("{}: {} reflected types in {} files", module.name, types, files.len());

    let Mode::Write { format, .. } = mode else {
        return Ok(Woven {
            manifest,
            state: None,
            outcome: ModuleOutcome::Checked { types },
        });
    };

    // Render everything before touching the output directory.
    let rendered: Vec<_> = woven
        .iter()
        .map(|w| (module.output.join(&w.relative), w.render(format)))
        .collect();
    for (path, text) in &rendered {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WeaveError::io(dir, e))?;
        }
        std::fs::write(path, text).map_err(|e| WeaveError::io(path, e))?;
    }
    manifest::write_manifest(manifest_dir, &manifest)?;
    log::info!("{}: wove {} files, {} reflected types", module.name, rendered.len(), types);

    let state = ModuleState {
        files: incremental::snapshot(files.iter().map(|f| f.path.as_path())),
        exported: manifest::fingerprint(&manifest),
        dependencies: job.fingerprints.clone(),
    };
    Ok(Woven {
        manifest,
        state: Some(state),
        outcome: ModuleOutcome::Woven {
            types,
            files: rendered.len(),
        },
    })
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

fn load_externals(config: &UmbraConfig) -> WeaveResult<Vec<ModuleManifest>> {
    config
        .externals
        .iter()
        .map(|e| {
            let mut manifest = manifest::read_manifest(&e.manifest)?;
            if manifest.module.is_empty() {
                manifest.module = e.name.clone();
            }
            Ok(manifest)
        })
        .collect()
}

fn run(config: &UmbraConfig, only: Option<&str>, mode: Mode) -> WeaveResult<WeaveReport> {
    let selected: Vec<&ModuleConfig> = match only {
        Some(name) => vec![config.module(name).ok_or_else(|| WeaveError::UnknownModule(name.to_string()))?],
        None => config.modules.iter().collect(),
    };
    let selected_names: HashSet<&str> = selected.iter().map(|m| m.name.as_str()).collect();
    let externals = load_externals(config)?;
    let manifest_dir = &config.weaver.manifest_dir;

    // Manifests visible to later modules: externals, unselected dependencies
    // from disk, then every module woven here.
    let mut known: HashMap<String, ModuleManifest> =
        externals.iter().map(|m| (m.module.clone(), m.clone())).collect();
    for module in &selected {
        for dep in &module.dependencies {
            if selected_names.contains(dep.as_str()) || known.contains_key(dep) {
                continue;
            }
            let path = manifest::manifest_path(manifest_dir, dep);
            if !path.is_file() {
                return Err(WeaveError::MissingManifest {
                    module: module.name.clone(),
                    dependency: dep.clone(),
                });
            }
            known.insert(dep.clone(), manifest::read_manifest(&path)?);
        }
    }

    let mut cache = Cache::load(&config.weaver.cache);
    let mut report = WeaveReport::default();
    let mut failed: HashSet<String> = HashSet::new();
    let mut produced: Vec<ModuleManifest> = Vec::new();

    for level in levels(&selected)? {
        let mut jobs = Vec::with_capacity(level.len());
        for module in level {
            if let Some(dep) = module.dependencies.iter().find(|d| failed.contains(d.as_str())) {
                log::error!("{}: skipped, dependency {dep} failed", module.name);
                failed.insert(module.name.clone());
                report.modules.push((
                    module.name.clone(),
                    ModuleOutcome::Failed(WeaveError::DependencyFailed {
                        module: module.name.clone(),
                        dependency: dep.clone(),
                    }),
                ));
                continue;
            }
            let mut deps: Vec<ModuleManifest> = module
                .dependencies
                .iter()
                .filter_map(|d| known.get(d).cloned())
                .collect();
            deps.extend(externals.iter().filter(|e| !module.dependencies.contains(&e.module)).cloned());
            let fingerprints = deps
                .iter()
                .map(|m| (m.module.clone(), manifest::fingerprint(m)))
                .collect();
            jobs.push(Job {
                module,
                deps,
                fingerprints,
                cached: cache.get(&module.name).cloned(),
            });
        }

        let results: Vec<WeaveResult<Woven>> = std::thread::scope(|s| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| s.spawn(move || weave_module(job, mode, manifest_dir)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        for (job, result) in jobs.iter().zip(results) {
            let name = job.module.name.clone();
            match result {
                Ok(woven) => {
                    if let Some(state) = woven.state {
                        cache.record(&name, state);
                    }
                    known.insert(name.clone(), woven.manifest.clone());
                    produced.push(woven.manifest);
                    report.modules.push((name, woven.outcome));
                }
                Err(e) => {
                    log::error!("{e}");
                    cache.forget(&name);
                    failed.insert(name.clone());
                    report.modules.push((name, ModuleOutcome::Failed(e)));
                }
            }
        }
    }

    if let Mode::Write { .. } = mode {
        let mut index = ManifestIndex::load(manifest_dir);
        for manifest in &produced {
            index.update(manifest);
        }
        if !produced.is_empty() {
            index.write(manifest_dir)?;
        }
        if let Err(e) = cache.save() {
            log::warn!("weave cache not saved: {e}");
        }
    }
    Ok(report)
}

/// Weave the configured modules, writing woven sources, manifests, the
/// index and the incremental cache. Per-module failures are reported, not
/// returned; see [`WeaveReport::into_result`].
pub fn weave(config: &UmbraConfig, options: &WeaveOptions) -> WeaveResult<WeaveReport> {
    run(
        config,
        options.only.as_deref(),
        Mode::Write {
            force: options.force,
            format: config.weaver.format,
        },
    )
}

/// Analyse the configured modules without writing anything.
pub fn check(config: &UmbraConfig, only: Option<&str>) -> WeaveResult<WeaveReport> {
    run(config, only, Mode::Check)
}

/// Delete the incremental cache and every manifest. Returns the number of
/// files removed.
pub fn clean(config: &UmbraConfig) -> WeaveResult<usize> {
    let mut removed = 0;
    let mut remove = |path: &Path| -> WeaveResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                removed += 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WeaveError::io(path, e)),
        }
    };
    remove(&config.weaver.cache)?;
    let dir = &config.weaver.manifest_dir;
    if dir.is_dir() {
        let entries = std::fs::read_dir(dir).map_err(|e| WeaveError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| WeaveError::io(dir, e))?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.ends_with(".manifest.json") || name == manifest::INDEX_FILE {
                remove(&path)?;
            }
        }
    }
    log::info!("removed {removed} files");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &Path, rel: &str, text: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn config(dir: &Path, body: &str) -> UmbraConfig {
        let path = dir.join("umbra.config.toml");
        std::fs::write(&path, format!("[weaver]\nformat = false\n{body}")).unwrap();
        UmbraConfig::load(&path).unwrap()
    }

    const TWO_MODULES: &str = r#"
[[module]]
name = "Core"
source = "core/src"
output = "core/woven"

[[module]]
name = "Game"
source = "game/src"
output = "game/woven"
dependencies = ["Core"]
"#;

    fn two_modules(dir: &Path) -> UmbraConfig {
        write(dir, "core/src/lib.rs", "#[uclass] pub struct Unit {}\n#[uclass_impl] impl Unit { #[ufunction(NativeEvent)] pub fn on_spawned(&self) {} }");
        write(
            dir,
            "game/src/lib.rs",
            r#"
            #[uclass(parent = Unit)] pub struct Turret { #[uproperty] health: f32 }
            #[uclass_impl] impl Turret {
                fn on_spawned(&self) { self.health = 10.0; }
            }
            "#,
        );
        config(dir, TWO_MODULES)
    }

    #[test]
    fn modules_weave_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_modules(dir.path());
        let report = weave(&config, &WeaveOptions::default()).unwrap();
        let names: Vec<_> = report.modules.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(names, ["Core", "Game"]);
        assert_eq!(report.failed(), 0);

        let game = std::fs::read_to_string(dir.path().join("game/woven/lib.rs")).unwrap();
        assert!(game.starts_with("// @generated"));
        assert!(game.contains("fn on_spawned_implementation"));
        assert!(game.contains(". parent (\"Core.Unit\")"));
        let manifests = dir.path().join("target/umbra/manifests");
        assert!(manifests.join("Core.manifest.json").is_file());
        let index = ManifestIndex::load(&manifests);
        assert_eq!(index.modules.len(), 2);
        let game_manifest = manifest::read_manifest(&manifests.join("Game.manifest.json")).unwrap();
        assert_eq!(game_manifest.classes[0].functions[0].declared_by.as_deref(), Some("Core.Unit"));
    }

    #[test]
    fn unchanged_modules_are_skipped_until_forced() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_modules(dir.path());
        weave(&config, &WeaveOptions::default()).unwrap();

        let again = weave(&config, &WeaveOptions::default()).unwrap();
        assert!(matches!(again.outcome("Core"), Some(ModuleOutcome::UpToDate)));
        assert!(matches!(again.outcome("Game"), Some(ModuleOutcome::UpToDate)));

        let forced = weave(
            &config,
            &WeaveOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(forced.outcome("Game"), Some(ModuleOutcome::Woven { types: 1, files: 1 })));
    }

    #[test]
    fn authoring_errors_write_nothing_and_fail_dependents() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "core/src/lib.rs",
            r#"
            #[uclass] pub struct Unit {}
            #[uclass_impl] impl Unit {
                #[ufunction(Server, Reliable)]
                pub fn ping(&self) -> i32 { 1 }
            }
            "#,
        );
        write(dir.path(), "game/src/lib.rs", "#[uclass(parent = Unit)] pub struct Turret {}");
        let config = config(dir.path(), TWO_MODULES);

        let report = weave(&config, &WeaveOptions::default()).unwrap();
        assert!(matches!(
            report.outcome("Core"),
            Some(ModuleOutcome::Failed(WeaveError::Authoring { .. }))
        ));
        assert!(matches!(
            report.outcome("Game"),
            Some(ModuleOutcome::Failed(WeaveError::DependencyFailed { .. }))
        ));
        assert!(!dir.path().join("core/woven").exists());
        assert!(!dir.path().join("target/umbra/manifests/Core.manifest.json").exists());
        assert!(matches!(report.into_result(), Err(WeaveError::Failed { failed: 2, total: 2 })));
    }

    #[test]
    fn single_module_reads_dependencies_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_modules(dir.path());
        let only_game = WeaveOptions {
            only: Some("Game".into()),
            force: true,
        };
        assert!(matches!(
            weave(&config, &only_game),
            Err(WeaveError::MissingManifest { dependency, .. }) if dependency == "Core"
        ));

        weave(
            &config,
            &WeaveOptions {
                only: Some("Core".into()),
                force: false,
            },
        )
        .unwrap();
        let report = weave(&config, &only_game).unwrap();
        assert_eq!(report.modules.len(), 1);
        assert_eq!(report.failed(), 0);
        assert!(matches!(
            weave(&config, &WeaveOptions { only: Some("Nope".into()), force: false }),
            Err(WeaveError::UnknownModule(_))
        ));
    }

    #[test]
    fn check_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_modules(dir.path());
        let report = check(&config, None).unwrap();
        assert!(matches!(report.outcome("Game"), Some(ModuleOutcome::Checked { types: 1 })));
        assert!(!dir.path().join("game/woven").exists());
        assert!(!dir.path().join("target").exists());
    }

    #[test]
    fn clean_removes_cache_and_manifests_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_modules(dir.path());
        weave(&config, &WeaveOptions::default()).unwrap();
        // Two manifests, the index and the cache.
        assert_eq!(clean(&config).unwrap(), 4);
        assert!(dir.path().join("game/woven/lib.rs").is_file());
        assert!(!PathBuf::from(&config.weaver.cache).exists());
        assert_eq!(clean(&config).unwrap(), 0);
    }

    #[test]
    fn module_cycles_are_rejected() {
        let a = ModuleConfig {
            name: "A".into(),
            source: PathBuf::new(),
            output: PathBuf::new(),
            package: None,
            dependencies: vec!["B".into()],
        };
        let b = ModuleConfig {
            name: "B".into(),
            dependencies: vec!["A".into()],
            ..a.clone()
        };
        assert!(matches!(levels(&[&a, &b]), Err(WeaveError::ModuleCycle(_))));

        let c = ModuleConfig {
            name: "C".into(),
            dependencies: Vec::new(),
            ..a.clone()
        };
        let d = ModuleConfig {
            name: "D".into(),
            dependencies: vec!["C".into()],
            ..a.clone()
        };
        let grouped = levels(&[&d, &c]).unwrap();
        let names: Vec<Vec<&str>> = grouped
            .iter()
            .map(|l| l.iter().map(|m| m.name.as_str()).collect())
            .collect();
        assert_eq!(names, [vec!["C"], vec!["D"]]);
    }
}
