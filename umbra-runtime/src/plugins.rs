// Plugin load/unload lifecycle.
//
// Shared assemblies are built into the default context and stay for the
// life of the process. Each plugin gets a fresh collectible context holding
// its own assemblies. The loader itself keeps only weak references to a
// plugin's context, assemblies and modules, so liveness is always observed,
// never assumed.
//
// Unloading runs shutdown hooks, begins unloading the context (which clears
// keep-alive buckets, binding caches and delegates), drops the context's
// strong references, then polls until nothing of the plugin is reachable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{UmbraError, UmbraResult};
use crate::handles::handles;
use crate::jobs::startup_jobs;
use crate::load_context::{self, ContextId, LoadContext};
use crate::registry::{linked_assemblies, Assembly, AssemblyBuilder, ModuleInterface, TypeInfo};

/// Symbol a plugin library exports (see `export_assembly!`).
pub const REGISTER_SYMBOL: &[u8] = b"umbra_register_assembly\0";

type RegisterFn = fn(&mut AssemblyBuilder);

/// Where an assembly's type descriptors come from.
#[derive(Clone, Debug)]
pub enum AssemblySource {
    /// Registration function compiled into the host.
    Static { name: String, register: RegisterFn },
    /// Dynamic library exporting `umbra_register_assembly`. The assembly is
    /// named after the file stem. The library must be built against the same
    /// `umbra-runtime` dylib and compiler as the host.
    Library { path: PathBuf },
}

impl AssemblySource {
    pub fn name(&self) -> String {
        match self {
            AssemblySource::Static { name, .. } => name.clone(),
            AssemblySource::Library { path } => library_stem(path),
        }
    }
}

fn library_stem(path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    stem.strip_prefix("lib").map(str::to_string).unwrap_or(stem)
}

#[derive(Clone, Debug)]
pub struct PluginDescriptor {
    pub name: String,
    pub assemblies: Vec<AssemblySource>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        PluginDescriptor {
            name: name.into(),
            assemblies: Vec::new(),
        }
    }

    pub fn with_assembly(mut self, source: AssemblySource) -> Self {
        self.assemblies.push(source);
        self
    }
}

/// Bounds on the unload liveness poll.
#[derive(Clone, Copy, Debug)]
pub struct UnloadPolicy {
    pub warn_after: Duration,
    pub give_up_after: Duration,
    pub poll_interval: Duration,
}

impl Default for UnloadPolicy {
    fn default() -> Self {
        UnloadPolicy {
            warn_after: Duration::from_millis(200),
            give_up_after: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Library lifetime
// ---------------------------------------------------------------------------

/// Owns a loaded plugin library on behalf of its assembly. Dropping the
/// guard only retires the library; it is unmapped later by
/// [`release_retired_libraries`], outside any code it contains.
pub(crate) struct LibraryGuard {
    path: PathBuf,
    library: Option<libloading::Library>,
}

impl Drop for LibraryGuard {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            retired().lock().push((std::mem::take(&mut self.path), library));
        }
    }
}

fn retired() -> &'static Mutex<Vec<(PathBuf, libloading::Library)>> {
    static RETIRED: OnceLock<Mutex<Vec<(PathBuf, libloading::Library)>>> = OnceLock::new();
    RETIRED.get_or_init(|| Mutex::new(Vec::new()))
}

/// Unmap libraries whose assemblies are gone. Returns how many were closed.
pub fn release_retired_libraries() -> usize {
    let libraries = std::mem::take(&mut *retired().lock());
    let count = libraries.len();
    for (path, library) in libraries {
        match library.close() {
            Ok(()) => log::info!("unloaded library {}", path.display()),
            Err(err) => log::warn!("closing {} failed: {err}", path.display()),
        }
    }
    count
}

fn open_library(path: &Path) -> UmbraResult<(RegisterFn, LibraryGuard)> {
    // SAFETY: loading runs the library's initialisers; plugin libraries are
    // trusted build outputs of the weaver.
    let library = unsafe { libloading::Library::new(path) }.map_err(|source| UmbraError::Library {
        path: path.to_path_buf(),
        source,
    })?;
    let register = unsafe { library.get::<RegisterFn>(REGISTER_SYMBOL) }
        .map(|symbol| *symbol)
        .map_err(|source| UmbraError::MissingSymbol {
            path: path.to_path_buf(),
            symbol: "umbra_register_assembly".to_string(),
            source,
        })?;
    Ok((
        register,
        LibraryGuard {
            path: path.to_path_buf(),
            library: Some(library),
        },
    ))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PluginState {
    Loaded,
    PendingUnload,
}

#[derive(Clone)]
struct PluginRecord {
    context_id: ContextId,
    context: Weak<LoadContext>,
    assemblies: Vec<Weak<Assembly>>,
    modules: Vec<Weak<dyn ModuleInterface>>,
    state: PluginState,
}

impl PluginRecord {
    fn is_context_alive(&self) -> bool {
        self.context.strong_count() > 0
    }

    fn is_assembly_alive(&self) -> bool {
        self.assemblies.iter().any(|a| a.strong_count() > 0)
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

pub struct PluginLoader {
    policy: UnloadPolicy,
    records: Mutex<HashMap<String, PluginRecord>>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        PluginLoader::new(UnloadPolicy::default())
    }
}

impl PluginLoader {
    pub fn new(policy: UnloadPolicy) -> Self {
        PluginLoader {
            policy,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> UnloadPolicy {
        self.policy
    }

    /// Build `source` into the default context. Shared assemblies never unload.
    pub fn load_shared(&self, source: &AssemblySource) -> UmbraResult<Arc<Assembly>> {
        let name = source.name();
        if find_in_context(&load_context::default_context(), &name).is_some() {
            return Err(UmbraError::DuplicateAssembly(name));
        }
        let cx = load_context::default_context();
        let assembly = build_into(&cx, source)?;
        start(&assembly);
        Ok(assembly)
    }

    /// Load every assembly registered with `link_assembly!` that is not loaded yet.
    pub fn load_linked_assemblies(&self) -> UmbraResult<usize> {
        let default = load_context::default_context();
        let mut loaded = 0;
        for registration in linked_assemblies() {
            if find_in_context(&default, registration.name).is_some() {
                continue;
            }
            self.load_shared(&AssemblySource::Static {
                name: registration.name.to_string(),
                register: registration.register,
            })?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Load a plugin into its own collectible context and run its startup
    /// jobs and module hooks. Returns the plugin's assemblies in load order.
    pub fn load_plugin(&self, descriptor: &PluginDescriptor) -> UmbraResult<Vec<Arc<Assembly>>> {
        if self.records.lock().contains_key(&descriptor.name) {
            return Err(UmbraError::PluginAlreadyLoaded(descriptor.name.clone()));
        }

        let cx = load_context::create(&descriptor.name, true);
        let default = load_context::default_context();
        let mut assemblies = Vec::with_capacity(descriptor.assemblies.len());
        let mut owned = Vec::new();
        for source in &descriptor.assemblies {
            if let Some(shared) = find_in_context(&default, &source.name()) {
                log::info!("plugin `{}` reuses shared assembly `{}`", descriptor.name, shared.name());
                assemblies.push(shared);
                continue;
            }
            match build_into(&cx, source) {
                Ok(assembly) => {
                    owned.push(assembly.clone());
                    assemblies.push(assembly);
                }
                Err(err) => {
                    log::error!("plugin `{}` failed to load: {}", descriptor.name, err.full_message());
                    drop(owned);
                    drop(assemblies);
                    abandon(cx);
                    return Err(err);
                }
            }
        }
        for assembly in &owned {
            start(assembly);
        }

        let record = PluginRecord {
            context_id: cx.id(),
            context: Arc::downgrade(&cx),
            assemblies: owned.iter().map(Arc::downgrade).collect(),
            modules: owned
                .iter()
                .flat_map(|a| a.modules().iter().map(Arc::downgrade))
                .collect(),
            state: PluginState::Loaded,
        };
        let mut records = self.records.lock();
        if records.contains_key(&descriptor.name) {
            drop(records);
            drop(owned);
            drop(assemblies);
            abandon(cx);
            return Err(UmbraError::PluginAlreadyLoaded(descriptor.name.clone()));
        }
        records.insert(descriptor.name.clone(), record);
        log::info!("loaded plugin `{}` into context {}", descriptor.name, cx.id());
        Ok(assemblies)
    }

    /// Unload a plugin and wait, within the policy's bounds, until it is no
    /// longer reachable. On timeout the plugin stays registered as pending;
    /// calling again resumes the wait.
    pub fn unload_plugin(&self, name: &str) -> UmbraResult<()> {
        let record = {
            let mut records = self.records.lock();
            let record = records.get_mut(name).ok_or_else(|| UmbraError::PluginNotFound(name.to_string()))?;
            let snapshot = record.clone();
            record.state = PluginState::PendingUnload;
            snapshot
        };

        match record.state {
            PluginState::Loaded => begin_teardown(name, &record),
            PluginState::PendingUnload => log::info!("resuming unload of plugin `{name}`"),
        }

        let started = Instant::now();
        let mut warned = false;
        loop {
            handles().sweep();
            if !record.is_context_alive() && !record.is_assembly_alive() {
                self.records.lock().remove(name);
                load_context::forget(record.context_id);
                release_retired_libraries();
                log::info!("unloaded plugin `{name}` in {} ms", started.elapsed().as_millis());
                return Ok(());
            }
            let elapsed = started.elapsed();
            if !warned && elapsed >= self.policy.warn_after {
                warned = true;
                log::warn!("plugin `{name}` still alive {} ms after unload began", elapsed.as_millis());
            }
            if elapsed >= self.policy.give_up_after {
                let err = UmbraError::UnloadTimeout {
                    name: name.to_string(),
                    elapsed_ms: elapsed.as_millis(),
                };
                log::error!("{err}; something still references it");
                return Err(err);
            }
            std::thread::sleep(self.policy.poll_interval);
        }
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.records
            .lock()
            .get(name)
            .is_some_and(|r| r.state == PluginState::Loaded && r.is_context_alive())
    }

    pub fn is_assembly_alive(&self, name: &str) -> bool {
        self.records.lock().get(name).is_some_and(PluginRecord::is_assembly_alive)
    }

    pub fn is_load_context_alive(&self, name: &str) -> bool {
        self.records.lock().get(name).is_some_and(PluginRecord::is_context_alive)
    }

    pub fn is_unload_pending(&self, name: &str) -> bool {
        self.records
            .lock()
            .get(name)
            .is_some_and(|r| r.state == PluginState::PendingUnload)
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .lock()
            .iter()
            .filter(|(_, r)| r.state == PluginState::Loaded)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// A loaded assembly by name: shared assemblies first, then plugin assemblies.
    pub fn find_assembly(&self, name: &str) -> Option<Arc<Assembly>> {
        if let Some(shared) = find_in_context(&load_context::default_context(), name) {
            return Some(shared);
        }
        self.records
            .lock()
            .values()
            .filter(|r| r.state == PluginState::Loaded)
            .flat_map(|r| r.assemblies.iter())
            .filter_map(Weak::upgrade)
            .find(|a| a.name() == name)
    }

    /// Unload every plugin, then run shutdown hooks of shared assemblies.
    pub fn shutdown_all(&self) {
        let names: Vec<String> = self.records.lock().keys().cloned().collect();
        for name in names {
            if let Err(err) = self.unload_plugin(&name) {
                log::error!("shutdown: {}", err.full_message());
            }
        }
        for assembly in load_context::default_context().assemblies().iter().rev() {
            for module in assembly.modules().iter().rev() {
                module.shutdown_module();
            }
        }
    }
}

fn find_in_context(cx: &LoadContext, name: &str) -> Option<Arc<Assembly>> {
    cx.assemblies().into_iter().find(|a| a.name() == name)
}

/// Parent lookup for a build into `cx`: the context's own assemblies, then shared ones.
fn external_type(cx: &LoadContext, full_name: &str) -> Option<Arc<TypeInfo>> {
    let own = cx.assemblies();
    let shared = match cx.id() {
        ContextId::DEFAULT => Vec::new(),
        _ => load_context::default_context().assemblies(),
    };
    own.iter()
        .chain(shared.iter())
        .find_map(|a| a.find_type(full_name).cloned())
}

fn build_into(cx: &Arc<LoadContext>, source: &AssemblySource) -> UmbraResult<Arc<Assembly>> {
    let mut builder = AssemblyBuilder::new(source.name());
    let library = match source {
        AssemblySource::Static { register, .. } => {
            register(&mut builder);
            None
        }
        AssemblySource::Library { path } => {
            let (register, guard) = open_library(path)?;
            register(&mut builder);
            Some(guard)
        }
    };
    let lookup = |full_name: &str| external_type(cx, full_name);
    let built = builder.build(cx.id(), &lookup, library)?;
    for job in built.startup_jobs {
        startup_jobs().register_boxed(built.assembly.name(), job);
    }
    cx.add_assembly(built.assembly.clone());
    Ok(built.assembly)
}

fn start(assembly: &Assembly) {
    let report = startup_jobs().run_for_assembly(assembly.name());
    if !report.failures.is_empty() {
        log::warn!("`{}`: {} of {} startup jobs failed", assembly.name(), report.failures.len(), report.ran);
    }
    for module in assembly.modules() {
        module.startup_module();
    }
}

fn begin_teardown(name: &str, record: &PluginRecord) {
    for module in record.modules.iter().rev().filter_map(Weak::upgrade) {
        module.shutdown_module();
    }
    if let Some(cx) = record.context.upgrade() {
        for assembly in cx.assemblies() {
            startup_jobs().discard(assembly.name());
        }
        cx.begin_unload();
        drop(cx.release_assemblies());
    }
    load_context::remove(record.context_id);
    log::info!("plugin `{name}`: unload started");
}

/// Tear down a context that never became a plugin.
fn abandon(cx: Arc<LoadContext>) {
    for assembly in cx.assemblies() {
        startup_jobs().discard(assembly.name());
    }
    cx.begin_unload();
    drop(cx.release_assemblies());
    let id = cx.id();
    load_context::remove(id);
    load_context::forget(id);
}

static PLUGINS: OnceLock<PluginLoader> = OnceLock::new();

/// The process-wide plugin loader.
pub fn plugins() -> &'static PluginLoader {
    PLUGINS.get_or_init(PluginLoader::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::construct::create_object;
    use crate::object::{ManagedClass, ObjectBase};
    use crate::registry::TypeDescriptor;
    use crate::resolver::lookup_type;

    struct Spawner {
        base: ObjectBase,
    }

    impl ManagedClass for Spawner {
        const FULL_NAME: &'static str = "Waves.Spawner";
        fn create_shell(base: ObjectBase) -> Self {
            Spawner { base }
        }
        fn object_base(&self) -> &ObjectBase {
            &self.base
        }
    }

    static STARTED: AtomicUsize = AtomicUsize::new(0);
    static STOPPED: AtomicUsize = AtomicUsize::new(0);

    struct WavesModule;

    impl ModuleInterface for WavesModule {
        fn startup_module(&self) {
            STARTED.fetch_add(1, Ordering::SeqCst);
        }
        fn shutdown_module(&self) {
            STOPPED.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn register_waves(builder: &mut AssemblyBuilder) {
        builder
            .add_type(TypeDescriptor::class::<Spawner>("Spawner"))
            .add_module(WavesModule)
            .add_startup_job(|| log::debug!("waves ready"));
    }

    fn quick() -> UnloadPolicy {
        UnloadPolicy {
            warn_after: Duration::from_millis(5),
            give_up_after: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn waves(plugin: &str) -> PluginDescriptor {
        PluginDescriptor::new(plugin).with_assembly(AssemblySource::Static {
            name: format!("{plugin}.Waves"),
            register: register_waves,
        })
    }

    #[test]
    fn plugin_loads_and_unloads_cleanly() {
        let loader = PluginLoader::new(quick());
        let assemblies = loader.load_plugin(&waves("Clean")).unwrap();
        assert_eq!(assemblies.len(), 1);
        assert!(loader.is_plugin_loaded("Clean"));
        assert!(loader.find_assembly("Clean.Waves").is_some());
        assert!(matches!(loader.load_plugin(&waves("Clean")), Err(UmbraError::PluginAlreadyLoaded(_))));

        let ty = lookup_type(&assemblies[0], "Waves.Spawner").unwrap();
        let _object = create_object(crate::NativeObjectPtr(0x5A00 as *mut c_void), ty).unwrap();
        drop(assemblies);

        loader.unload_plugin("Clean").unwrap();
        assert!(!loader.is_plugin_loaded("Clean"));
        assert!(!loader.is_assembly_alive("Clean"));
        assert!(!loader.is_load_context_alive("Clean"));
        assert!(loader.loaded_plugins().is_empty());
        assert!(matches!(loader.unload_plugin("Clean"), Err(UmbraError::PluginNotFound(_))));
    }

    #[test]
    fn unload_gives_up_while_referenced_and_resumes() {
        let loader = PluginLoader::new(quick());
        let assemblies = loader.load_plugin(&waves("Sticky")).unwrap();
        let ty = lookup_type(&assemblies[0], "Waves.Spawner").unwrap();
        let handle = create_object(crate::NativeObjectPtr(0x5B00 as *mut c_void), ty).unwrap();
        // An outstanding managed reference anchors the assembly.
        let leaked = handles().resolve::<Spawner>(handle).unwrap();
        drop(assemblies);

        let started = Instant::now();
        let err = loader.unload_plugin("Sticky").unwrap_err();
        assert!(matches!(err, UmbraError::UnloadTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(loader.is_unload_pending("Sticky"));
        assert!(!loader.is_plugin_loaded("Sticky"));
        assert!(loader.is_assembly_alive("Sticky"));

        drop(leaked);
        loader.unload_plugin("Sticky").unwrap();
        assert!(!loader.is_assembly_alive("Sticky"));
    }

    #[test]
    fn timed_out_plugin_still_accepts_allocations() {
        let loader = PluginLoader::new(quick());
        let assemblies = loader.load_plugin(&waves("Lingering")).unwrap();
        let context = assemblies[0].context();
        let ty = lookup_type(&assemblies[0], "Waves.Spawner").unwrap();
        let handle = create_object(crate::NativeObjectPtr(0x5C00 as *mut c_void), ty).unwrap();
        let leaked = handles().resolve::<Spawner>(handle).unwrap();
        drop(assemblies);
        assert!(matches!(loader.unload_plugin("Lingering"), Err(UmbraError::UnloadTimeout { .. })));

        // Valid tokens, no keep-alive.
        let value = Arc::new(7u32);
        let late = handles()
            .allocate_strong(crate::handles::ManagedRef::value(value.clone()), context)
            .unwrap();
        assert!(!late.is_null());
        assert_eq!(handles().strong_count(context), 0);
        drop(value);
        assert!(handles().resolve::<u32>(late).is_none());
        let second = create_object(crate::NativeObjectPtr(0x5C08 as *mut c_void), ty).unwrap();
        assert!(!second.is_null());

        drop(leaked);
        loader.unload_plugin("Lingering").unwrap();
        let err = handles()
            .allocate_strong(crate::handles::ManagedRef::value(Arc::new(8u32)), context)
            .unwrap_err();
        assert!(matches!(err, UmbraError::ContextNotFound(_)));
    }

    #[test]
    fn module_hooks_bracket_the_plugin() {
        let loader = PluginLoader::new(quick());
        let started = STARTED.load(Ordering::SeqCst);
        let stopped = STOPPED.load(Ordering::SeqCst);
        loader.load_plugin(&waves("Hooks")).unwrap();
        assert!(STARTED.load(Ordering::SeqCst) > started);
        loader.unload_plugin("Hooks").unwrap();
        assert!(STOPPED.load(Ordering::SeqCst) > stopped);
    }

    #[test]
    fn plugin_reuses_shared_assembly() {
        let loader = PluginLoader::new(quick());
        fn register_core(builder: &mut AssemblyBuilder) {
            builder.add_type(TypeDescriptor::new(crate::TypeKind::Class, "Actor", "SharedCore.Actor"));
        }
        let shared = AssemblySource::Static {
            name: "SharedCore".to_string(),
            register: register_core,
        };
        let core = loader.load_shared(&shared).unwrap();
        assert!(matches!(loader.load_shared(&shared), Err(UmbraError::DuplicateAssembly(_))));

        let assemblies = loader
            .load_plugin(&PluginDescriptor::new("Reuser").with_assembly(shared.clone()))
            .unwrap();
        assert!(Arc::ptr_eq(&assemblies[0], &core));
        drop(assemblies);
        loader.unload_plugin("Reuser").unwrap();
        assert!(loader.find_assembly("SharedCore").is_some());
    }

    #[test]
    fn missing_library_is_a_plugin_error() {
        let loader = PluginLoader::new(quick());
        let dir = tempfile::tempdir().unwrap();
        let descriptor = PluginDescriptor::new("Broken").with_assembly(AssemblySource::Library {
            path: dir.path().join("libbroken.so"),
        });
        let err = loader.load_plugin(&descriptor).unwrap_err();
        assert!(matches!(err, UmbraError::Library { .. }));
        assert_eq!(err.status(), crate::BridgeStatus::PluginError);
        assert!(!loader.is_plugin_loaded("Broken"));
    }

    #[test]
    fn library_stem_drops_platform_prefix() {
        assert_eq!(library_stem(Path::new("/p/libgame_waves.so")), "game_waves");
        assert_eq!(library_stem(Path::new("C:/p/GameWaves.dll")), "GameWaves");
    }
}
