// Object construction bridge: builds the managed shadow of a native object.
//
// Construction is two-phase. The shell is built around an `ObjectBase` that
// already carries the native pointer, then the type's constructor thunk runs
// the authored constructor. Only then is the shadow published as a strong
// handle in its type's context and indexed by native pointer.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use umbra_ffi::{GcHandle, NativeObjectPtr};

use crate::error::{UmbraError, UmbraResult};
use crate::handles::{handles, ManagedRef};
use crate::object::{ManagedObject, ObjectBase};
use crate::resolver::resolve_type;

static SHADOWS: OnceLock<DashMap<usize, GcHandle>> = OnceLock::new();

fn shadows() -> &'static DashMap<usize, GcHandle> {
    SHADOWS.get_or_init(DashMap::new)
}

/// Create the shadow of `native` as an instance of the type behind `type_handle`.
pub fn create_object(native: NativeObjectPtr, type_handle: GcHandle) -> UmbraResult<GcHandle> {
    if native.is_null() {
        return Err(UmbraError::NullArgument("native object"));
    }
    let info = resolve_type(type_handle)?;
    let (Some(shell), Some(constructor)) = (info.shell, info.constructor) else {
        return Err(UmbraError::ConstructorMissing(info.full_name().to_string()));
    };

    let base = ObjectBase::new(native);
    if let Some(assembly) = info.assembly() {
        base.anchor(assembly);
    }
    let mut object = shell(base);
    constructor(&mut *object);

    let object: Arc<dyn ManagedObject> = Arc::from(object);
    let handle = handles().allocate_strong(ManagedRef::Object(object), info.context())?;
    if let Some(previous) = shadows().insert(native.addr(), handle) {
        log::warn!(
            "native object {:#x} already had shadow {:#x}; replaced by {}",
            native.addr(),
            previous.0,
            info.full_name()
        );
    }
    Ok(handle)
}

/// Handle of the shadow created for `native`, if any.
pub fn find_shadow(native: NativeObjectPtr) -> Option<GcHandle> {
    shadows().get(&native.addr()).map(|h| *h)
}

pub(crate) fn forget_shadow(native: NativeObjectPtr) {
    shadows().remove(&native.addr());
}

/// Drop the index entry for `native` if its shadow is gone. A newer shadow
/// registered for the same native object is left alone.
pub(crate) fn forget_dead_shadow(native: NativeObjectPtr) {
    shadows().remove_if(&native.addr(), |_, handle| handles().resolve_ref(*handle).is_none());
}

/// Dispose the shadow behind `handle` and release the handle.
pub fn dispose_object(handle: GcHandle) {
    if let Some(object) = handles().resolve_object(handle) {
        object.object_base().dispose();
    }
    handles().free(handle, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_context::ContextId;
    use crate::object::ManagedClass;
    use crate::registry::{AssemblyBuilder, TypeDescriptor};
    use crate::resolver::lookup_type;
    use std::ffi::c_void;

    struct Turret {
        base: ObjectBase,
        pointer_seen_in_constructor: Option<usize>,
    }

    impl ManagedClass for Turret {
        const FULL_NAME: &'static str = "Defense.Turret";

        fn create_shell(base: ObjectBase) -> Self {
            Turret {
                base,
                pointer_seen_in_constructor: None,
            }
        }

        fn construct(&mut self) {
            self.pointer_seen_in_constructor = self.base.try_native_ptr().ok().map(|p| p.addr());
        }

        fn object_base(&self) -> &ObjectBase {
            &self.base
        }
    }

    struct Blueprint {
        base: ObjectBase,
    }

    impl ManagedClass for Blueprint {
        const FULL_NAME: &'static str = "Defense.Blueprint";
        fn create_shell(base: ObjectBase) -> Self {
            Blueprint { base }
        }
        fn object_base(&self) -> &ObjectBase {
            &self.base
        }
    }

    fn type_handle(name: &str) -> GcHandle {
        let mut builder = AssemblyBuilder::new("Defense");
        builder
            .add_type(TypeDescriptor::class::<Turret>("Turret"))
            .add_type(TypeDescriptor::abstract_class::<Blueprint>("Blueprint"));
        let asm = builder.build(ContextId::DEFAULT, &|_| None, None).unwrap().assembly;
        let handle = lookup_type(&asm, name).unwrap();
        // The cached type handle keeps the type alive; leak the assembly for the test's duration.
        std::mem::forget(asm);
        handle
    }

    #[test]
    fn native_pointer_is_set_before_constructor_runs() {
        let native = NativeObjectPtr(0xBEE0 as *mut c_void);
        let handle = create_object(native, type_handle("Defense.Turret")).unwrap();
        let turret = handles().resolve::<Turret>(handle).unwrap();
        assert_eq!(turret.pointer_seen_in_constructor, Some(0xBEE0));
        assert_eq!(find_shadow(native), Some(handle));

        dispose_object(handle);
        assert!(turret.base.is_disposed());
        assert!(find_shadow(native).is_none());
        assert!(handles().resolve::<Turret>(handle).is_none());
    }

    #[test]
    fn construction_failures_are_errors() {
        let native = NativeObjectPtr(0xBEE8 as *mut c_void);
        assert!(matches!(
            create_object(NativeObjectPtr::null(), type_handle("Defense.Turret")),
            Err(UmbraError::NullArgument(_))
        ));
        assert!(matches!(
            create_object(native, type_handle("Defense.Blueprint")),
            Err(UmbraError::ConstructorMissing(name)) if name == "Defense.Blueprint"
        ));
        assert!(matches!(create_object(native, GcHandle(0xdead_0001)), Err(UmbraError::HandleType { .. })));
    }
}
