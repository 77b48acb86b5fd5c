// Type and method resolution for native callers.
//
// Results are handed out as strong handles and cached per key: types on
// their assembly, methods on the type that declares them, so every subclass
// (and every reload of a plugin subclass) shares one handle per method. A
// miss is not an error; it resolves to the null handle.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use umbra_ffi::GcHandle;

use crate::error::{UmbraError, UmbraResult};
use crate::handles::{handles, ManagedRef};
use crate::registry::{Assembly, MethodInfo, TypeInfo};

/// Handle to the type named `full_name` in `assembly`, or the null handle.
pub fn lookup_type(assembly: &Assembly, full_name: &str) -> UmbraResult<GcHandle> {
    if let Some(handle) = assembly.type_cache.get(full_name) {
        return Ok(*handle);
    }
    let Some(info) = assembly.find_type(full_name) else {
        log::debug!("`{}`: no type named `{full_name}`", assembly.name());
        return Ok(GcHandle::NULL);
    };
    match assembly.type_cache.entry(full_name.to_string()) {
        Entry::Occupied(entry) => Ok(*entry.get()),
        Entry::Vacant(entry) => {
            let handle = handles().allocate_strong(ManagedRef::value(info.clone()), assembly.context())?;
            entry.insert(handle);
            Ok(handle)
        }
    }
}

/// Handle to the method `name` declared on the type behind `type_handle` or
/// on its nearest ancestor, or the null handle. The handle lives in the
/// declaring type's context.
pub fn lookup_method(type_handle: GcHandle, name: &str) -> UmbraResult<GcHandle> {
    let info = resolve_type(type_handle)?;
    let Some((declarer, method)) = info.find_declared_method(name) else {
        log::debug!("`{}`: no method `{name}` on type or ancestors", info.full_name());
        return Ok(GcHandle::NULL);
    };
    if let Some(handle) = declarer.method_cache.get(name) {
        return Ok(*handle);
    }
    match declarer.method_cache.entry(name.to_string()) {
        Entry::Occupied(entry) => Ok(*entry.get()),
        Entry::Vacant(entry) => {
            let handle = handles().allocate_strong(ManagedRef::value(method.clone()), method.context())?;
            entry.insert(handle);
            Ok(handle)
        }
    }
}

/// Handle through which native code refers to `assembly`.
pub fn assembly_handle(assembly: &Arc<Assembly>) -> UmbraResult<GcHandle> {
    if let Some(handle) = assembly.handle.get() {
        return Ok(*handle);
    }
    let handle = handles().allocate_strong(ManagedRef::value(assembly.clone()), assembly.context())?;
    match assembly.handle.set(handle) {
        Ok(()) => Ok(handle),
        Err(_) => {
            // Lost the race; keep the first handle.
            handles().free(handle, Some(assembly.context()));
            assembly
                .handle
                .get()
                .copied()
                .ok_or(UmbraError::InvalidHandle(handle.0))
        }
    }
}

pub(crate) fn resolve_type(handle: GcHandle) -> UmbraResult<Arc<TypeInfo>> {
    if handle.is_null() {
        return Err(UmbraError::NullArgument("type handle"));
    }
    handles().resolve::<TypeInfo>(handle).ok_or(UmbraError::HandleType {
        handle: handle.0,
        expected: "type",
    })
}

pub(crate) fn resolve_method(handle: GcHandle) -> UmbraResult<Arc<MethodInfo>> {
    if handle.is_null() {
        return Err(UmbraError::NullArgument("method handle"));
    }
    handles().resolve::<MethodInfo>(handle).ok_or(UmbraError::HandleType {
        handle: handle.0,
        expected: "method",
    })
}

pub(crate) fn resolve_assembly(handle: GcHandle) -> UmbraResult<Arc<Assembly>> {
    if handle.is_null() {
        return Err(UmbraError::NullArgument("assembly handle"));
    }
    handles().resolve::<Assembly>(handle).ok_or(UmbraError::HandleType {
        handle: handle.0,
        expected: "assembly",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_context::ContextId;
    use crate::object::ManagedObject;
    use crate::registry::{AssemblyBuilder, MethodBody, TypeDescriptor, TypeKind};

    fn noop(_: &dyn ManagedObject) {}

    fn hierarchy() -> Arc<Assembly> {
        let mut builder = AssemblyBuilder::new("ResolverTest");
        builder
            .add_type(
                TypeDescriptor::new(TypeKind::Class, "Pawn", "Resolve.Pawn")
                    .method("ReceiveTick", MethodBody::Bare(noop)),
            )
            .add_type(TypeDescriptor::new(TypeKind::Class, "Hero", "Resolve.Hero").parent("Resolve.Pawn"));
        builder.build(ContextId::DEFAULT, &|_| None, None).unwrap().assembly
    }

    #[test]
    fn type_lookup_is_cached_and_misses_are_null() {
        let asm = hierarchy();
        let first = lookup_type(&asm, "Resolve.Hero").unwrap();
        assert!(!first.is_null());
        assert_eq!(lookup_type(&asm, "Resolve.Hero").unwrap(), first);
        assert_eq!(resolve_type(first).unwrap().name(), "Hero");
        assert!(lookup_type(&asm, "Resolve.Villain").unwrap().is_null());
    }

    #[test]
    fn method_resolution_walks_ancestry() {
        let asm = hierarchy();
        let hero = lookup_type(&asm, "Resolve.Hero").unwrap();
        let method = lookup_method(hero, "ReceiveTick").unwrap();
        let info = resolve_method(method).unwrap();
        assert_eq!(info.declaring_type(), "Resolve.Pawn");
        assert_eq!(lookup_method(hero, "ReceiveTick").unwrap(), method);
        assert!(lookup_method(hero, "Missing").unwrap().is_null());
    }

    #[test]
    fn inherited_method_handle_survives_subclass_reloads() {
        let base = hierarchy();
        let pawn = lookup_type(&base, "Resolve.Pawn").unwrap();
        let declared = lookup_method(pawn, "ReceiveTick").unwrap();
        let external = |full_name: &str| base.find_type(full_name).cloned();

        for _ in 0..3 {
            let cx = crate::load_context::create("ResolverReload", true);
            let mut builder = AssemblyBuilder::new("ResolverReload");
            builder.add_type(TypeDescriptor::new(TypeKind::Class, "Sidekick", "Reload.Sidekick").parent("Resolve.Pawn"));
            let child = builder.build(cx.id(), &external, None).unwrap().assembly;
            let sidekick = lookup_type(&child, "Reload.Sidekick").unwrap();
            assert_eq!(lookup_method(sidekick, "ReceiveTick").unwrap(), declared);

            cx.begin_unload();
            let id = cx.id();
            drop((child, cx));
            crate::load_context::remove(id);
            crate::load_context::forget(id);
        }
    }

    #[test]
    fn method_lookup_rejects_non_type_handles() {
        let asm = hierarchy();
        let hero = lookup_type(&asm, "Resolve.Hero").unwrap();
        let method = lookup_method(hero, "ReceiveTick").unwrap();
        assert!(matches!(lookup_method(method, "ReceiveTick"), Err(UmbraError::HandleType { .. })));
        assert!(matches!(lookup_method(GcHandle::NULL, "x"), Err(UmbraError::NullArgument(_))));
    }

    #[test]
    fn assembly_handle_is_stable() {
        let asm = hierarchy();
        let h = assembly_handle(&asm).unwrap();
        assert_eq!(assembly_handle(&asm).unwrap(), h);
        assert!(Arc::ptr_eq(&resolve_assembly(h).unwrap(), &asm));
    }
}
