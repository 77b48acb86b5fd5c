// Member bindings: lazily resolved native reflection pointers.
//
// Generated code declares one `static` binding per native class, struct,
// function and property it touches. A binding resolves by name through the
// native API on first use and caches the result in a table keyed by
// (load context, owner, member). Every entry of a context is dropped when
// that context begins unloading, so a reloaded plugin never sees pointers
// resolved for its predecessor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use umbra_ffi::{NativeClassPtr, NativeFunctionPtr, NativePropertyPtr, NativeStructPtr};

use crate::api::reflection;
use crate::error::{UmbraError, UmbraResult};
use crate::invoke::raise;
use crate::load_context::{self, ContextId};

/// Load context of the assembly a set of generated bindings belongs to.
/// Bound by `AssemblyBuilder::bind_module_cell` when the assembly loads.
pub struct ModuleCell {
    name: &'static str,
    context: AtomicU64,
}

impl ModuleCell {
    pub const fn new(name: &'static str) -> Self {
        ModuleCell {
            name,
            context: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn context(&self) -> ContextId {
        ContextId::from_raw(self.context.load(Ordering::Acquire))
    }

    pub fn bind(&self, context: ContextId) {
        self.context.store(context.raw(), Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Resolved values
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct ResolvedParam {
    pub property: NativePropertyPtr,
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug)]
pub struct ResolvedFunction {
    pub name: &'static str,
    pub class: NativeClassPtr,
    pub function: NativeFunctionPtr,
    pub params_size: usize,
    /// In declaration order.
    pub params: Vec<ResolvedParam>,
    pub return_value: Option<ResolvedParam>,
}

impl ResolvedFunction {
    pub fn param(&self, index: usize) -> &ResolvedParam {
        &self.params[index]
    }

    /// Return slot of a function declared with a return value.
    pub fn ret(&self) -> &ResolvedParam {
        match &self.return_value {
            Some(ret) => ret,
            None => raise(UmbraError::InvocationMismatch(format!("{} has no return value", self.name))),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ResolvedStruct {
    pub native: NativeStructPtr,
    pub size: usize,
}

#[derive(Clone)]
enum Resolved {
    Class(NativeClassPtr),
    Struct(ResolvedStruct),
    Function(Arc<ResolvedFunction>),
    Property(ResolvedParam),
}

// ---------------------------------------------------------------------------
// Binding table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum MemberKind {
    Class,
    Struct,
    Function,
    Property,
}

type BindingKey = (ContextId, MemberKind, &'static str, &'static str);

#[derive(Default)]
struct BindingTable {
    entries: DashMap<BindingKey, Resolved>,
    hooked: DashMap<ContextId, ()>,
}

impl BindingTable {
    fn get_or_resolve(
        &'static self,
        key: BindingKey,
        resolve: impl FnOnce() -> UmbraResult<Resolved>,
    ) -> UmbraResult<Resolved> {
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }
        let resolved = resolve()?;
        self.watch(key.0);
        self.entries.entry(key).or_insert(resolved.clone());
        Ok(resolved)
    }

    fn watch(&'static self, context: ContextId) {
        if context == ContextId::DEFAULT || self.hooked.insert(context, ()).is_some() {
            return;
        }
        if let Some(cx) = load_context::find(context) {
            cx.on_unload(move |id| self.invalidate(id));
        }
    }

    fn invalidate(&self, context: ContextId) {
        self.entries.retain(|key, _| key.0 != context);
        self.hooked.remove(&context);
        log::debug!("context {context}: binding cache cleared");
    }
}

fn table() -> &'static BindingTable {
    static TABLE: OnceLock<BindingTable> = OnceLock::new();
    TABLE.get_or_init(BindingTable::default)
}

/// Number of cached bindings for `context`.
pub fn cached_bindings(context: ContextId) -> usize {
    table().entries.iter().filter(|e| e.key().0 == context).count()
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

fn name_args(name: &str) -> (*const u8, u32) {
    (name.as_ptr(), name.len() as u32)
}

pub struct ClassBinding {
    module: &'static ModuleCell,
    name: &'static str,
}

impl ClassBinding {
    pub const fn new(module: &'static ModuleCell, name: &'static str) -> Self {
        ClassBinding { module, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn resolve(&self) -> UmbraResult<NativeClassPtr> {
        let key = (self.module.context(), MemberKind::Class, self.name, "");
        let resolved = table().get_or_resolve(key, || {
            let (ptr, len) = name_args(self.name);
            let class = unsafe { (reflection().find_class)(ptr, len) };
            if class.is_null() {
                return Err(UmbraError::ClassNotFound(self.name.to_string()));
            }
            Ok(Resolved::Class(class))
        })?;
        match resolved {
            Resolved::Class(class) => Ok(class),
            _ => Err(UmbraError::ClassNotFound(self.name.to_string())),
        }
    }

    pub fn get(&self) -> NativeClassPtr {
        self.resolve().unwrap_or_else(|e| raise(e))
    }
}

pub struct StructBinding {
    module: &'static ModuleCell,
    name: &'static str,
}

impl StructBinding {
    pub const fn new(module: &'static ModuleCell, name: &'static str) -> Self {
        StructBinding { module, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn resolve(&self) -> UmbraResult<ResolvedStruct> {
        let key = (self.module.context(), MemberKind::Struct, self.name, "");
        let resolved = table().get_or_resolve(key, || {
            let (ptr, len) = name_args(self.name);
            let native = unsafe { (reflection().find_struct)(ptr, len) };
            if native.is_null() {
                return Err(UmbraError::StructNotFound(self.name.to_string()));
            }
            let size = unsafe { (reflection().struct_size)(native) } as usize;
            Ok(Resolved::Struct(ResolvedStruct { native, size }))
        })?;
        match resolved {
            Resolved::Struct(s) => Ok(s),
            _ => Err(UmbraError::StructNotFound(self.name.to_string())),
        }
    }

    pub fn get(&self) -> ResolvedStruct {
        self.resolve().unwrap_or_else(|e| raise(e))
    }
}

fn resolve_param(function: NativeFunctionPtr, owner: &str, name: &str) -> UmbraResult<ResolvedParam> {
    let (ptr, len) = name_args(name);
    let property = unsafe { (reflection().find_function_param)(function, ptr, len) };
    if property.is_null() {
        return Err(UmbraError::PropertyNotFound(format!("{owner}({name})")));
    }
    Ok(ResolvedParam {
        property,
        offset: unsafe { (reflection().property_offset)(property) } as usize,
        size: unsafe { (reflection().property_size)(property) } as usize,
    })
}

pub struct FunctionBinding {
    class: &'static ClassBinding,
    name: &'static str,
    params: &'static [&'static str],
    has_return: bool,
}

impl FunctionBinding {
    pub const fn new(
        class: &'static ClassBinding,
        name: &'static str,
        params: &'static [&'static str],
        has_return: bool,
    ) -> Self {
        FunctionBinding {
            class,
            name,
            params,
            has_return,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn resolve(&self) -> UmbraResult<Arc<ResolvedFunction>> {
        let key = (self.class.module.context(), MemberKind::Function, self.class.name, self.name);
        let resolved = table().get_or_resolve(key, || {
            let class = self.class.resolve()?;
            let (ptr, len) = name_args(self.name);
            let function = unsafe { (reflection().find_function)(class, ptr, len) };
            let qualified = format!("{}.{}", self.class.name, self.name);
            if function.is_null() {
                return Err(UmbraError::FunctionNotFound(qualified));
            }
            let params = self
                .params
                .iter()
                .map(|p| resolve_param(function, &qualified, p))
                .collect::<UmbraResult<Vec<_>>>()?;
            let return_value = match self.has_return {
                true => Some(resolve_param(function, &qualified, "ReturnValue")?),
                false => None,
            };
            Ok(Resolved::Function(Arc::new(ResolvedFunction {
                name: self.name,
                class,
                function,
                params_size: unsafe { (reflection().function_params_size)(function) } as usize,
                params,
                return_value,
            })))
        })?;
        match resolved {
            Resolved::Function(f) => Ok(f),
            _ => Err(UmbraError::FunctionNotFound(self.name.to_string())),
        }
    }

    pub fn get(&self) -> Arc<ResolvedFunction> {
        self.resolve().unwrap_or_else(|e| raise(e))
    }
}

#[derive(Clone, Copy)]
pub enum PropertyOwner {
    Class(&'static ClassBinding),
    Struct(&'static StructBinding),
}

pub struct PropertyBinding {
    owner: PropertyOwner,
    name: &'static str,
}

impl PropertyBinding {
    pub const fn of_class(class: &'static ClassBinding, name: &'static str) -> Self {
        PropertyBinding {
            owner: PropertyOwner::Class(class),
            name,
        }
    }

    pub const fn of_struct(owner: &'static StructBinding, name: &'static str) -> Self {
        PropertyBinding {
            owner: PropertyOwner::Struct(owner),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn resolve(&self) -> UmbraResult<ResolvedParam> {
        let (context, owner_name) = match self.owner {
            PropertyOwner::Class(c) => (c.module.context(), c.name),
            PropertyOwner::Struct(s) => (s.module.context(), s.name),
        };
        let resolved = table().get_or_resolve((context, MemberKind::Property, owner_name, self.name), || {
            let owner = match self.owner {
                PropertyOwner::Class(c) => c.resolve()?.0,
                PropertyOwner::Struct(s) => s.resolve()?.native.0,
            };
            let (ptr, len) = name_args(self.name);
            let property = unsafe { (reflection().find_property)(owner, ptr, len) };
            if property.is_null() {
                return Err(UmbraError::PropertyNotFound(format!("{owner_name}.{}", self.name)));
            }
            Ok(Resolved::Property(ResolvedParam {
                property,
                offset: unsafe { (reflection().property_offset)(property) } as usize,
                size: unsafe { (reflection().property_size)(property) } as usize,
            }))
        })?;
        match resolved {
            Resolved::Property(p) => Ok(p),
            _ => Err(UmbraError::PropertyNotFound(self.name.to_string())),
        }
    }

    pub fn get(&self) -> ResolvedParam {
        self.resolve().unwrap_or_else(|e| raise(e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fake_native;

    pub(crate) static MODULE: ModuleCell = ModuleCell::new("Fake");
    pub(crate) static TARGET: ClassBinding = ClassBinding::new(&MODULE, "Target");
    pub(crate) static TARGET_ADD: FunctionBinding = FunctionBinding::new(&TARGET, "Add", &["A", "B"], true);
    pub(crate) static TARGET_DOUBLE: FunctionBinding = FunctionBinding::new(&TARGET, "Double", &["Value"], false);
    pub(crate) static TARGET_HEALTH: PropertyBinding = PropertyBinding::of_class(&TARGET, "Health");
    pub(crate) static TARGET_LABEL: PropertyBinding = PropertyBinding::of_class(&TARGET, "Label");
    pub(crate) static TARGET_SCORES: PropertyBinding = PropertyBinding::of_class(&TARGET, "Scores");
    static VECTOR: StructBinding = StructBinding::new(&MODULE, "Vector");
    static VECTOR_Y: PropertyBinding = PropertyBinding::of_struct(&VECTOR, "Y");

    #[test]
    fn function_binding_resolves_layout() {
        fake_native::install();
        let add = TARGET_ADD.get();
        assert_eq!(add.params_size, 12);
        assert_eq!(add.param(0).offset, 0);
        assert_eq!(add.param(1).offset, 4);
        assert_eq!(add.ret().offset, 8);
        assert!(Arc::ptr_eq(&add, &TARGET_ADD.get()));
    }

    #[test]
    fn struct_and_property_bindings_resolve() {
        fake_native::install();
        assert_eq!(VECTOR.get().size, 12);
        assert_eq!(VECTOR_Y.get().offset, 4);
        assert_eq!(TARGET_HEALTH.get().size, 4);
    }

    #[test]
    fn missing_members_are_errors() {
        fake_native::install();
        static GHOST: ClassBinding = ClassBinding::new(&MODULE, "Ghost");
        static TARGET_FLY: FunctionBinding = FunctionBinding::new(&TARGET, "Fly", &[], false);
        assert!(matches!(GHOST.resolve(), Err(UmbraError::ClassNotFound(_))));
        assert!(matches!(TARGET_FLY.resolve(), Err(UmbraError::FunctionNotFound(n)) if n == "Target.Fly"));
    }

    #[test]
    fn unloading_context_clears_its_bindings() {
        fake_native::install();
        static PLUGIN: ModuleCell = ModuleCell::new("Plugin");
        static PLUGIN_TARGET: ClassBinding = ClassBinding::new(&PLUGIN, "Target");
        let cx = load_context::create("bindings", true);
        PLUGIN.bind(cx.id());
        PLUGIN_TARGET.get();
        assert_eq!(cached_bindings(cx.id()), 1);
        cx.begin_unload();
        assert_eq!(cached_bindings(cx.id()), 0);
        load_context::remove(cx.id());
    }
}
