// Type registry: assemblies and the reflected types they define.
//
// Woven code describes each type with a `TypeDescriptor` (plain fn pointers,
// no reflection) and hands the descriptors to an `AssemblyBuilder`. Building
// links parents base-first, binds every method to its declaring type's
// context, and produces an immutable `Assembly`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use umbra_ffi::GcHandle;

use crate::bindings::ModuleCell;
use crate::error::{UmbraError, UmbraResult};
use crate::jobs::StartupJob;
use crate::load_context::ContextId;
use crate::object::{ManagedClass, ManagedObject, ObjectBase};
use crate::plugins::LibraryGuard;

pub type ShellFactory = fn(ObjectBase) -> Box<dyn ManagedObject>;
pub type ConstructorFn = fn(&mut dyn ManagedObject);
/// `(instance, argument block, return buffer)`.
pub type BufferedInvoker = unsafe fn(&dyn ManagedObject, *mut u8, *mut u8);
pub type StaticBufferedInvoker = unsafe fn(*mut u8, *mut u8);

/// Calling convention of a managed method reachable from native code.
#[derive(Clone, Copy)]
pub enum MethodBody {
    Bare(fn(&dyn ManagedObject)),
    Buffered(BufferedInvoker),
    StaticBare(fn()),
    StaticBuffered(StaticBufferedInvoker),
}

impl MethodBody {
    pub fn is_static(&self) -> bool {
        matches!(self, MethodBody::StaticBare(_) | MethodBody::StaticBuffered(_))
    }
}

pub struct MethodInfo {
    name: &'static str,
    declaring_type: &'static str,
    context: ContextId,
    body: MethodBody,
}

impl MethodInfo {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Full name of the type that declares the method.
    pub fn declaring_type(&self) -> &'static str {
        self.declaring_type
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn body(&self) -> MethodBody {
        self.body
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeKind {
    Class,
    Struct,
    Enum,
    Interface,
}

// ---------------------------------------------------------------------------
// Descriptors (input)
// ---------------------------------------------------------------------------

pub struct TypeDescriptor {
    name: &'static str,
    full_name: &'static str,
    kind: TypeKind,
    parent: Option<&'static str>,
    methods: Vec<(&'static str, MethodBody)>,
    shell: Option<ShellFactory>,
    constructor: Option<ConstructorFn>,
}

fn shell_factory<T: ManagedClass>(base: ObjectBase) -> Box<dyn ManagedObject> {
    Box::new(T::create_shell(base))
}

fn constructor_thunk<T: ManagedClass>(object: &mut dyn ManagedObject) {
    if let Some(object) = object.as_any_mut().downcast_mut::<T>() {
        object.construct();
    }
}

impl TypeDescriptor {
    pub fn new(kind: TypeKind, name: &'static str, full_name: &'static str) -> Self {
        TypeDescriptor {
            name,
            full_name,
            kind,
            parent: None,
            methods: Vec::new(),
            shell: None,
            constructor: None,
        }
    }

    /// Instantiable class backed by `T`.
    pub fn class<T: ManagedClass>(name: &'static str) -> Self {
        TypeDescriptor {
            shell: Some(shell_factory::<T>),
            constructor: Some(constructor_thunk::<T>),
            ..TypeDescriptor::new(TypeKind::Class, name, T::FULL_NAME)
        }
    }

    /// Class whose instances cannot be created by the bridge.
    pub fn abstract_class<T: ManagedClass>(name: &'static str) -> Self {
        TypeDescriptor {
            shell: Some(shell_factory::<T>),
            ..TypeDescriptor::new(TypeKind::Class, name, T::FULL_NAME)
        }
    }

    /// Full name of the parent type (in this or an already loaded assembly).
    pub fn parent(mut self, full_name: &'static str) -> Self {
        self.parent = Some(full_name);
        self
    }

    pub fn method(mut self, name: &'static str, body: MethodBody) -> Self {
        self.methods.push((name, body));
        self
    }

    pub fn full_name(&self) -> &'static str {
        self.full_name
    }
}

// ---------------------------------------------------------------------------
// TypeInfo (built)
// ---------------------------------------------------------------------------

pub struct TypeInfo {
    name: &'static str,
    full_name: &'static str,
    kind: TypeKind,
    parent: Option<Arc<TypeInfo>>,
    methods: HashMap<&'static str, Arc<MethodInfo>>,
    pub(crate) shell: Option<ShellFactory>,
    pub(crate) constructor: Option<ConstructorFn>,
    context: ContextId,
    assembly: Weak<Assembly>,
    pub(crate) method_cache: DashMap<String, GcHandle>,
}

impl TypeInfo {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn full_name(&self) -> &'static str {
        self.full_name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&Arc<TypeInfo>> {
        self.parent.as_ref()
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn assembly(&self) -> Option<Arc<Assembly>> {
        self.assembly.upgrade()
    }

    /// This type followed by each ancestor up to the root.
    pub fn ancestry(&self) -> impl Iterator<Item = &TypeInfo> {
        std::iter::successors(Some(self), |t| t.parent.as_deref())
    }

    /// Method declared here or on the nearest ancestor that declares it.
    pub fn find_method(&self, name: &str) -> Option<Arc<MethodInfo>> {
        self.ancestry().find_map(|t| t.methods.get(name).cloned())
    }

    /// Like [`find_method`](Self::find_method), also returning the declaring type.
    pub fn find_declared_method(&self, name: &str) -> Option<(&TypeInfo, Arc<MethodInfo>)> {
        self.ancestry()
            .find_map(|t| t.methods.get(name).map(|m| (t, m.clone())))
    }

    pub fn is_a(&self, full_name: &str) -> bool {
        self.ancestry().any(|t| t.full_name == full_name)
    }

    pub fn is_constructible(&self) -> bool {
        self.shell.is_some() && self.constructor.is_some()
    }
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("parent", &self.parent.as_ref().map(|p| p.full_name))
            .field("context", &self.context)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Module hooks
// ---------------------------------------------------------------------------

/// Startup/shutdown hooks a plugin assembly can register.
pub trait ModuleInterface: Send + Sync {
    /// Called after the assembly's startup jobs ran.
    fn startup_module(&self) {}
    /// Called before the owning context begins unloading.
    fn shutdown_module(&self) {}
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Registration of an assembly linked into the host binary.
pub struct AssemblyRegistration {
    pub name: &'static str,
    pub register: fn(&mut AssemblyBuilder),
}

inventory::collect!(AssemblyRegistration);

/// Every assembly registered with `link_assembly!`.
pub fn linked_assemblies() -> impl Iterator<Item = &'static AssemblyRegistration> {
    inventory::iter::<AssemblyRegistration>.into_iter()
}

pub struct Assembly {
    name: String,
    context: ContextId,
    types: Vec<Arc<TypeInfo>>,
    modules: Vec<Arc<dyn ModuleInterface>>,
    pub(crate) type_cache: DashMap<String, GcHandle>,
    pub(crate) handle: OnceLock<GcHandle>,
    // Last field: the code above must be dropped before the library is released.
    _library: Option<LibraryGuard>,
}

impl Assembly {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn types(&self) -> &[Arc<TypeInfo>] {
        &self.types
    }

    pub fn modules(&self) -> &[Arc<dyn ModuleInterface>] {
        &self.modules
    }

    pub fn find_type(&self, full_name: &str) -> Option<&Arc<TypeInfo>> {
        self.types.iter().find(|t| t.full_name == full_name)
    }
}

impl std::fmt::Debug for Assembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembly")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("types", &self.types.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AssemblyBuilder
// ---------------------------------------------------------------------------

pub struct AssemblyBuilder {
    name: String,
    types: Vec<TypeDescriptor>,
    modules: Vec<Arc<dyn ModuleInterface>>,
    startup_jobs: Vec<StartupJob>,
    cells: Vec<&'static ModuleCell>,
}

pub(crate) struct BuiltAssembly {
    pub assembly: Arc<Assembly>,
    pub startup_jobs: Vec<StartupJob>,
}

impl std::fmt::Debug for BuiltAssembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltAssembly")
            .field("assembly", &self.assembly.name())
            .field("startup_jobs", &self.startup_jobs.len())
            .finish()
    }
}

impl AssemblyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        AssemblyBuilder {
            name: name.into(),
            types: Vec::new(),
            modules: Vec::new(),
            startup_jobs: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_type(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.types.push(descriptor);
        self
    }

    pub fn add_module(&mut self, module: impl ModuleInterface + 'static) -> &mut Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Queue work to run once, right after the assembly is loaded.
    pub fn add_startup_job(&mut self, job: impl FnOnce() + Send + 'static) -> &mut Self {
        self.startup_jobs.push(Box::new(job));
        self
    }

    /// Point generated bindings at the context this assembly is loaded into.
    pub fn bind_module_cell(&mut self, cell: &'static ModuleCell) -> &mut Self {
        self.cells.push(cell);
        self
    }

    /// Order descriptors so every parent defined in this assembly precedes its children.
    fn base_first_order(&self) -> UmbraResult<Vec<usize>> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(self.types.len());
        for (i, t) in self.types.iter().enumerate() {
            if index.insert(t.full_name, i).is_some() {
                return Err(UmbraError::DuplicateType(t.full_name.to_string()));
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }
        let mut marks = vec![Mark::New; self.types.len()];
        let mut order = Vec::with_capacity(self.types.len());
        let mut stack: Vec<(usize, bool)> = Vec::new();

        for root in 0..self.types.len() {
            stack.push((root, false));
            while let Some((i, expanded)) = stack.pop() {
                if expanded {
                    marks[i] = Mark::Done;
                    order.push(i);
                    continue;
                }
                if marks[i] != Mark::New {
                    continue;
                }
                marks[i] = Mark::Visiting;
                stack.push((i, true));
                if let Some(&p) = self.types[i].parent.and_then(|p| index.get(p)) {
                    match marks[p] {
                        Mark::New => stack.push((p, false)),
                        Mark::Visiting => {
                            return Err(UmbraError::InheritanceCycle(self.types[p].full_name.to_string()));
                        }
                        Mark::Done => {}
                    }
                }
            }
        }
        Ok(order)
    }

    /// Build the assembly into `context`. `external` resolves parents defined
    /// by assemblies that are already loaded.
    pub(crate) fn build(
        self,
        context: ContextId,
        external: &dyn Fn(&str) -> Option<Arc<TypeInfo>>,
        library: Option<LibraryGuard>,
    ) -> UmbraResult<BuiltAssembly> {
        let order = self.base_first_order()?;
        let AssemblyBuilder {
            name,
            types,
            modules,
            startup_jobs,
            cells,
        } = self;

        let mut slots: Vec<Option<TypeDescriptor>> = types.into_iter().map(Some).collect();
        let assembly = Arc::new_cyclic(|weak: &Weak<Assembly>| {
            let mut built: HashMap<&'static str, Arc<TypeInfo>> = HashMap::new();
            let mut declared: Vec<(usize, Arc<TypeInfo>)> = Vec::with_capacity(order.len());
            for &i in &order {
                let Some(d) = slots[i].take() else { continue };
                let parent = d
                    .parent
                    .and_then(|p| built.get(p).cloned().or_else(|| external(p)));
                if parent.is_none() {
                    if let Some(p) = d.parent {
                        log::debug!("{}: parent `{p}` has no managed type", d.full_name);
                    }
                }
                let methods = d
                    .methods
                    .into_iter()
                    .map(|(method_name, body)| {
                        let info = MethodInfo {
                            name: method_name,
                            declaring_type: d.full_name,
                            context,
                            body,
                        };
                        (method_name, Arc::new(info))
                    })
                    .collect();
                let info = Arc::new(TypeInfo {
                    name: d.name,
                    full_name: d.full_name,
                    kind: d.kind,
                    parent,
                    methods,
                    shell: d.shell,
                    constructor: d.constructor,
                    context,
                    assembly: weak.clone(),
                    method_cache: DashMap::new(),
                });
                built.insert(d.full_name, info.clone());
                declared.push((i, info));
            }
            declared.sort_by_key(|(i, _)| *i);
            Assembly {
                name: name.clone(),
                context,
                types: declared.into_iter().map(|(_, t)| t).collect(),
                modules,
                type_cache: DashMap::new(),
                handle: OnceLock::new(),
                _library: library,
            }
        });

        for cell in cells {
            cell.bind(context);
        }
        log::info!("built assembly `{name}` in context {context}: {} types", assembly.types.len());
        Ok(BuiltAssembly {
            assembly,
            startup_jobs,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct Creature {
        pub base: ObjectBase,
    }

    impl ManagedClass for Creature {
        const FULL_NAME: &'static str = "Zoo.Creature";
        fn create_shell(base: ObjectBase) -> Self {
            Creature { base }
        }
        fn object_base(&self) -> &ObjectBase {
            &self.base
        }
    }

    fn noop(_: &dyn ManagedObject) {}
    fn other(_: &dyn ManagedObject) {}

    #[test]
    fn parents_link_regardless_of_declaration_order() {
        let mut builder = AssemblyBuilder::new("Zoo");
        builder
            .add_type(TypeDescriptor::new(TypeKind::Class, "Cat", "Zoo.Cat").parent("Zoo.Mammal"))
            .add_type(
                TypeDescriptor::new(TypeKind::Class, "Mammal", "Zoo.Mammal")
                    .parent("Zoo.Creature")
                    .method("Breathe", MethodBody::Bare(noop)),
            )
            .add_type(TypeDescriptor::class::<Creature>("Creature"));
        let built = builder.build(ContextId::DEFAULT, &|_| None, None).unwrap();
        let asm = built.assembly;
        let names: Vec<_> = asm.types().iter().map(|t| t.full_name()).collect();
        assert_eq!(names, ["Zoo.Cat", "Zoo.Mammal", "Zoo.Creature"]);

        let cat = asm.find_type("Zoo.Cat").unwrap();
        assert!(cat.is_a("Zoo.Creature"));
        let breathe = cat.find_method("Breathe").unwrap();
        assert_eq!(breathe.declaring_type(), "Zoo.Mammal");
        assert!(cat.find_method("Fly").is_none());
        assert!(Arc::ptr_eq(&cat.assembly().unwrap(), &asm));
    }

    #[test]
    fn nearest_declaration_wins() {
        let mut builder = AssemblyBuilder::new("Shadowing");
        builder
            .add_type(TypeDescriptor::new(TypeKind::Class, "Base", "S.Base").method("Act", MethodBody::Bare(noop)))
            .add_type(
                TypeDescriptor::new(TypeKind::Class, "Derived", "S.Derived")
                    .parent("S.Base")
                    .method("Act", MethodBody::Bare(other)),
            );
        let asm = builder.build(ContextId::DEFAULT, &|_| None, None).unwrap().assembly;
        let act = asm.find_type("S.Derived").unwrap().find_method("Act").unwrap();
        assert_eq!(act.declaring_type(), "S.Derived");
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let mut builder = AssemblyBuilder::new("Loop");
        builder
            .add_type(TypeDescriptor::new(TypeKind::Class, "A", "L.A").parent("L.B"))
            .add_type(TypeDescriptor::new(TypeKind::Class, "B", "L.B").parent("L.A"));
        let err = builder.build(ContextId::DEFAULT, &|_| None, None).unwrap_err();
        assert!(matches!(err, UmbraError::InheritanceCycle(_)));
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let mut builder = AssemblyBuilder::new("Dup");
        builder
            .add_type(TypeDescriptor::new(TypeKind::Struct, "P", "D.P"))
            .add_type(TypeDescriptor::new(TypeKind::Struct, "P", "D.P"));
        assert!(matches!(
            builder.build(ContextId::DEFAULT, &|_| None, None),
            Err(UmbraError::DuplicateType(_))
        ));
    }

    #[test]
    fn external_parent_is_linked() {
        let mut base = AssemblyBuilder::new("Core");
        base.add_type(TypeDescriptor::new(TypeKind::Class, "Actor", "Core.Actor").method("Tick", MethodBody::Bare(noop)));
        let core = base.build(ContextId::DEFAULT, &|_| None, None).unwrap().assembly;

        let mut game = AssemblyBuilder::new("Game");
        game.add_type(TypeDescriptor::new(TypeKind::Class, "Door", "Game.Door").parent("Core.Actor"));
        let lookup = |name: &str| core.find_type(name).cloned();
        let asm = game.build(ContextId::DEFAULT, &lookup, None).unwrap().assembly;
        let tick = asm.find_type("Game.Door").unwrap().find_method("Tick").unwrap();
        assert_eq!(tick.declaring_type(), "Core.Actor");
    }
}
