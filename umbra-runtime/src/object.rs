// Managed shadow objects.
//
// Every woven class embeds an `ObjectBase` as its first field. The native
// pointer is stored before any authored code runs and is zeroed exactly once
// on disposal; afterwards the object refuses to hand it out.

use std::any::Any;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock};

use umbra_ffi::NativeObjectPtr;

use crate::error::{UmbraError, UmbraResult};
use crate::registry::Assembly;

pub struct ObjectBase {
    native: AtomicPtr<c_void>,
    // Keeps the defining assembly (and its code) loaded while the object exists.
    assembly: OnceLock<Arc<Assembly>>,
}

impl ObjectBase {
    pub fn new(native: NativeObjectPtr) -> Self {
        ObjectBase {
            native: AtomicPtr::new(native.0),
            assembly: OnceLock::new(),
        }
    }

    /// Native pointer of a live object.
    ///
    /// # Panics
    /// Panics if the object has been disposed; the FFI boundary reports the
    /// panic to native callers as an error.
    pub fn native_ptr(&self) -> NativeObjectPtr {
        match self.try_native_ptr() {
            Ok(ptr) => ptr,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_native_ptr(&self) -> UmbraResult<NativeObjectPtr> {
        let ptr = self.native.load(Ordering::Acquire);
        if ptr.is_null() {
            Err(UmbraError::ObjectDisposed)
        } else {
            Ok(NativeObjectPtr(ptr))
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.native.load(Ordering::Acquire).is_null()
    }

    /// Zero the native pointer. Returns true only for the call that disposed.
    pub fn dispose(&self) -> bool {
        let old = self.native.swap(ptr::null_mut(), Ordering::AcqRel);
        if old.is_null() {
            return false;
        }
        crate::construct::forget_shadow(NativeObjectPtr(old));
        true
    }

    pub(crate) fn anchor(&self, assembly: Arc<Assembly>) {
        let _ = self.assembly.set(assembly);
    }

    /// Assembly that defined this object's type, if it was built by the bridge.
    pub fn assembly(&self) -> Option<&Arc<Assembly>> {
        self.assembly.get()
    }
}

impl Drop for ObjectBase {
    fn drop(&mut self) {
        let native = *self.native.get_mut();
        if !native.is_null() {
            crate::construct::forget_dead_shadow(NativeObjectPtr(native));
        }
    }
}

impl std::fmt::Debug for ObjectBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBase")
            .field("native", &self.native.load(Ordering::Relaxed))
            .finish()
    }
}

/// Object-safe view of a shadow object, as stored in the handle table.
pub trait ManagedObject: Any + Send + Sync {
    fn object_base(&self) -> &ObjectBase;
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Implemented by woven classes.
///
/// Construction is two-phase: `create_shell` builds the object around a base
/// that already carries the native pointer, then `construct` runs the
/// authored parameterless constructor.
pub trait ManagedClass: Any + Send + Sync + Sized {
    /// Native full name used for type lookup (`Module.Type`).
    const FULL_NAME: &'static str;

    fn create_shell(base: ObjectBase) -> Self;

    fn construct(&mut self) {}

    fn object_base(&self) -> &ObjectBase;
}

impl<T: ManagedClass> ManagedObject for T {
    fn object_base(&self) -> &ObjectBase {
        ManagedClass::object_base(self)
    }

    fn type_name(&self) -> &'static str {
        T::FULL_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_is_idempotent_and_zeroes_pointer() {
        let base = ObjectBase::new(NativeObjectPtr(0x1000 as *mut c_void));
        assert_eq!(base.native_ptr().addr(), 0x1000);
        assert!(base.dispose());
        assert!(!base.dispose());
        assert!(base.is_disposed());
        assert!(matches!(base.try_native_ptr(), Err(UmbraError::ObjectDisposed)));
    }

    #[test]
    #[should_panic(expected = "object has been disposed")]
    fn native_ptr_after_dispose_panics() {
        let base = ObjectBase::new(NativeObjectPtr(0x2000 as *mut c_void));
        base.dispose();
        let _ = base.native_ptr();
    }
}
