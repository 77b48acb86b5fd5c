// Managed callbacks that native code can fire through a handle.
//
// A delegate is stored as a strong handle in the context of the code that
// bound it, so unloading that context drops the closure along with the rest
// of the plugin. Invocation clones the `Arc` out of the handle table before
// calling, so a callback may free its own handle or bind new ones.

use std::sync::Arc;

use umbra_ffi::GcHandle;

use crate::error::{UmbraError, UmbraResult};
use crate::handles::{handles, ManagedRef};
use crate::load_context::ContextId;
use crate::object_ref::{ObjectRef, WeakObjectRef};
use crate::values::{Delegate, Name, ScriptDelegate};

pub struct ManagedDelegate {
    context: ContextId,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl ManagedDelegate {
    pub fn context(&self) -> ContextId {
        self.context
    }
}

/// Register `callback` and return the handle native code invokes it through.
pub fn bind_delegate(context: ContextId, callback: impl Fn() + Send + Sync + 'static) -> UmbraResult<GcHandle> {
    let delegate = Arc::new(ManagedDelegate {
        context,
        callback: Box::new(callback),
    });
    handles().allocate_strong(ManagedRef::value(delegate), context)
}

pub fn invoke_delegate(handle: GcHandle) -> UmbraResult<()> {
    if handle.is_null() {
        return Err(UmbraError::NullArgument("delegate handle"));
    }
    let delegate = handles().resolve::<ManagedDelegate>(handle).ok_or(UmbraError::HandleType {
        handle: handle.0,
        expected: "delegate",
    })?;
    (delegate.callback)();
    Ok(())
}

pub fn unbind_delegate(handle: GcHandle) {
    handles().free(handle, None);
}

impl<F: ?Sized> Delegate<F> {
    /// Native delegate that calls `function` on `target`.
    pub fn bind<T: ?Sized>(target: ObjectRef<T>, function: &str) -> Self {
        Delegate::from_raw(ScriptDelegate {
            object: WeakObjectRef::new(target).raw(),
            function: Name::new(function).0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::fake_native::{self, TargetObject};
    use crate::load_context;

    #[test]
    fn delegate_fires_until_unbound() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = bind_delegate(ContextId::DEFAULT, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        invoke_delegate(handle).unwrap();
        invoke_delegate(handle).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        unbind_delegate(handle);
        assert!(invoke_delegate(handle).is_err());
    }

    #[test]
    fn unload_drops_bound_closures() {
        let cx = load_context::create("delegates", true);
        let marker = Arc::new(());
        let held = marker.clone();
        let handle = bind_delegate(cx.id(), move || {
            let _ = &held;
        })
        .unwrap();
        assert_eq!(Arc::strong_count(&marker), 2);
        cx.begin_unload();
        assert_eq!(Arc::strong_count(&marker), 1);
        assert!(invoke_delegate(handle).is_err());
        load_context::remove(cx.id());
    }

    #[test]
    fn script_delegate_binds_native_target() {
        fake_native::install();
        let mut native = TargetObject::new();
        let delegate = Delegate::<dyn Fn(i32)>::bind(ObjectRef::<()>::from_native(native.ptr()), "OnHit");
        assert!(delegate.is_bound());
        assert_eq!(Name(delegate.raw().function).to_string_lossy(), "OnHit");
    }
}
