// Invocation bridge, both directions.
//
// Native → managed: `invoke_method` / `invoke_method_buffered` resolve the
// handles and dispatch on the method's calling convention. Generated invokers
// read their arguments from the native parameter block with `read_arg` and
// write results back with `write_arg` / `write_return`.
//
// Managed → native: generated stubs fill a `ParamBuffer` laid out by a
// `ResolvedFunction` and hand it to `call_native`.

use std::sync::Arc;

use umbra_ffi::{GcHandle, NativeFunctionPtr, NativeObjectPtr};

use crate::api::{memory, object};
use crate::bindings::{ResolvedFunction, ResolvedParam};
use crate::error::{check_status, UmbraError, UmbraResult};
use crate::handles::handles;
use crate::marshal::Marshaller;
use crate::object::{ManagedClass, ManagedObject};
use crate::registry::{MethodBody, MethodInfo};
use crate::resolver::resolve_method;

// ---------------------------------------------------------------------------
// Native → managed
// ---------------------------------------------------------------------------

fn resolve_receiver(object: GcHandle, method: &MethodInfo) -> UmbraResult<Arc<dyn ManagedObject>> {
    if object.is_null() {
        return Err(UmbraError::NullArgument("object handle"));
    }
    let target = handles().resolve_object(object).ok_or(UmbraError::HandleType {
        handle: object.0,
        expected: "object",
    })?;
    if target.object_base().is_disposed() {
        log::warn!("{}.{} invoked on a disposed object", method.declaring_type(), method.name());
        return Err(UmbraError::ObjectDisposed);
    }
    Ok(target)
}

/// Invoke a parameterless method. Static methods accept the null object handle.
pub fn invoke_method(object: GcHandle, method: GcHandle) -> UmbraResult<()> {
    let info = resolve_method(method)?;
    match info.body() {
        MethodBody::Bare(f) => {
            let target = resolve_receiver(object, &info)?;
            f(&*target);
        }
        MethodBody::StaticBare(f) => f(),
        MethodBody::Buffered(_) | MethodBody::StaticBuffered(_) => {
            return Err(UmbraError::InvocationMismatch(info.name().to_string()));
        }
    }
    Ok(())
}

/// Invoke a method with a native parameter block and return buffer.
///
/// # Safety
/// `args` and `ret` must be laid out as the method's native function expects.
pub unsafe fn invoke_method_buffered(object: GcHandle, method: GcHandle, args: *mut u8, ret: *mut u8) -> UmbraResult<()> {
    let info = resolve_method(method)?;
    match info.body() {
        MethodBody::Buffered(f) => {
            let target = resolve_receiver(object, &info)?;
            unsafe { f(&*target, args, ret) };
        }
        MethodBody::StaticBuffered(f) => unsafe { f(args, ret) },
        // A parameterless method may still be reached through the buffered entry point.
        MethodBody::Bare(f) => {
            let target = resolve_receiver(object, &info)?;
            f(&*target);
        }
        MethodBody::StaticBare(f) => f(),
    }
    Ok(())
}

/// Concrete receiver of a generated invoker.
///
/// # Panics
/// Panics if `object` is not a `T`; the FFI boundary reports it as an error.
pub fn receiver<T: ManagedClass>(object: &dyn ManagedObject) -> &T {
    match object.as_any().downcast_ref::<T>() {
        Some(this) => this,
        None => panic!("expected receiver `{}`, found `{}`", T::FULL_NAME, object.type_name()),
    }
}

/// Read argument `param` from a native parameter block.
///
/// # Safety
/// `args` must point at a parameter block containing `param`.
pub unsafe fn read_arg<M: Marshaller>(args: *const u8, param: &ResolvedParam) -> M::Value {
    unsafe { M::from_native(args.add(param.offset), param.property) }
}

/// Write `value` back into argument `param` (out and in-out parameters).
///
/// # Safety
/// `args` must point at a parameter block containing `param`.
pub unsafe fn write_arg<M: Marshaller>(args: *mut u8, param: &ResolvedParam, value: &M::Value) {
    unsafe { M::to_native(value, args.add(param.offset), param.property) }
}

/// Write a return value into the caller's return buffer.
///
/// # Safety
/// `ret` must be null or point at storage for the function's return property.
pub unsafe fn write_return<M: Marshaller>(ret: *mut u8, function: &ResolvedFunction, value: &M::Value) {
    if ret.is_null() {
        return;
    }
    unsafe { M::to_native(value, ret, function.ret().property) }
}

// ---------------------------------------------------------------------------
// Managed → native
// ---------------------------------------------------------------------------

const INLINE_PARAMS: usize = 256;

#[repr(C, align(16))]
struct InlineParams([u8; INLINE_PARAMS]);

enum Storage {
    Inline(InlineParams),
    Heap(Vec<u128>),
}

/// Native parameter block for one call. Small frames live inline; larger
/// ones on the heap. Native initialisation runs on first access and native
/// destruction on drop, so the buffer must not be moved after it was used.
pub struct ParamBuffer {
    storage: Storage,
    size: usize,
    function: NativeFunctionPtr,
    initialized: bool,
}

impl ParamBuffer {
    pub fn new(function: &ResolvedFunction) -> Self {
        let size = function.params_size;
        let storage = if size <= INLINE_PARAMS {
            Storage::Inline(InlineParams([0; INLINE_PARAMS]))
        } else {
            Storage::Heap(vec![0u128; size.div_ceil(16)])
        };
        ParamBuffer {
            storage,
            size,
            function: function.function,
            initialized: false,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.storage, Storage::Inline(_))
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        let ptr = match &mut self.storage {
            Storage::Inline(inline) => inline.0.as_mut_ptr(),
            Storage::Heap(heap) => heap.as_mut_ptr() as *mut u8,
        };
        if !self.initialized {
            self.initialized = true;
            unsafe { (memory().init_params)(self.function, ptr) };
        }
        ptr
    }

    /// Marshal `value` into `param`.
    ///
    /// # Safety
    /// `param` must belong to the function this buffer was created for.
    pub unsafe fn write<M: Marshaller>(&mut self, param: &ResolvedParam, value: &M::Value) {
        let base = self.as_mut_ptr();
        unsafe { write_arg::<M>(base, param, value) }
    }

    /// Marshal `param` out of the buffer.
    ///
    /// # Safety
    /// `param` must belong to the function this buffer was created for.
    pub unsafe fn read<M: Marshaller>(&mut self, param: &ResolvedParam) -> M::Value {
        let base = self.as_mut_ptr();
        unsafe { read_arg::<M>(base, param) }
    }
}

impl Drop for ParamBuffer {
    fn drop(&mut self) {
        if self.initialized {
            let ptr = self.as_mut_ptr();
            unsafe { (memory().destroy_params)(self.function, ptr) };
        }
    }
}

/// Call `function` on the native object `target`.
pub fn call_native(target: NativeObjectPtr, function: &ResolvedFunction, params: &mut ParamBuffer) -> UmbraResult<()> {
    if target.is_null() {
        return Err(UmbraError::NullArgument("native call target"));
    }
    let status = unsafe { (object().invoke_function)(target, function.function, params.as_mut_ptr()) };
    check_status(status, function.name)
}

/// Call a static native function through its class default object.
pub fn call_native_static(function: &ResolvedFunction, params: &mut ParamBuffer) -> UmbraResult<()> {
    let cdo = unsafe { (object().class_default_object)(function.class) };
    call_native(cdo, function, params)
}

/// Abort generated code that cannot continue. The panic is caught and
/// reported at the FFI boundary.
#[cold]
pub fn raise(err: UmbraError) -> ! {
    panic!("{}", err.full_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::bindings::tests::{TARGET_ADD, TARGET_DOUBLE};
    use crate::fake_native::{self, TargetObject, PARAMS_DESTROYED};
    use crate::load_context::ContextId;
    use crate::marshal::Blittable;
    use crate::object::ObjectBase;
    use crate::registry::{AssemblyBuilder, TypeDescriptor};
    use crate::resolver::{lookup_method, lookup_type};

    #[test]
    fn stub_round_trip_through_native() {
        fake_native::install();
        let mut object = TargetObject::new();
        let add = TARGET_ADD.get();
        let destroyed = PARAMS_DESTROYED.load(Ordering::SeqCst);
        {
            let mut params = ParamBuffer::new(&add);
            assert!(params.is_inline());
            unsafe {
                params.write::<Blittable<i32>>(add.param(0), &40);
                params.write::<Blittable<i32>>(add.param(1), &2);
            }
            call_native(object.ptr(), &add, &mut params).unwrap();
            assert_eq!(unsafe { params.read::<Blittable<i32>>(add.ret()) }, 42);
        }
        assert_eq!(object.last_sum, 42);
        assert!(PARAMS_DESTROYED.load(Ordering::SeqCst) > destroyed);
    }

    #[test]
    fn in_out_params_are_read_back() {
        fake_native::install();
        let double = TARGET_DOUBLE.get();
        let mut params = ParamBuffer::new(&double);
        unsafe { params.write::<Blittable<i32>>(double.param(0), &21) };
        call_native_static(&double, &mut params).unwrap();
        assert_eq!(unsafe { params.read::<Blittable<i32>>(double.param(0)) }, 42);
    }

    #[test]
    fn null_target_is_rejected() {
        fake_native::install();
        let add = TARGET_ADD.get();
        let mut params = ParamBuffer::new(&add);
        assert!(matches!(
            call_native(NativeObjectPtr::null(), &add, &mut params),
            Err(UmbraError::NullArgument(_))
        ));
    }

    struct Counter {
        base: ObjectBase,
        hits: std::sync::atomic::AtomicI32,
    }

    impl ManagedClass for Counter {
        const FULL_NAME: &'static str = "Invoke.Counter";
        fn create_shell(base: ObjectBase) -> Self {
            Counter {
                base,
                hits: Default::default(),
            }
        }
        fn object_base(&self) -> &ObjectBase {
            &self.base
        }
    }

    fn bump(object: &dyn ManagedObject) {
        receiver::<Counter>(object).hits.fetch_add(1, Ordering::SeqCst);
    }

    // Native `Add(A, B) -> ReturnValue` implemented in managed code.
    unsafe fn add_invoker(object: &dyn ManagedObject, args: *mut u8, ret: *mut u8) {
        let this = receiver::<Counter>(object);
        let add = TARGET_ADD.get();
        let a = unsafe { read_arg::<Blittable<i32>>(args, add.param(0)) };
        let b = unsafe { read_arg::<Blittable<i32>>(args, add.param(1)) };
        this.hits.fetch_add(1, Ordering::SeqCst);
        unsafe { write_return::<Blittable<i32>>(ret, &add, &(a * b)) };
    }

    #[test]
    fn native_calls_reach_managed_bodies() {
        fake_native::install();
        let mut builder = AssemblyBuilder::new("Invoke");
        builder.add_type(
            TypeDescriptor::class::<Counter>("Counter")
                .method("Bump", MethodBody::Bare(bump))
                .method("Add", MethodBody::Buffered(add_invoker)),
        );
        let asm = builder.build(ContextId::DEFAULT, &|_| None, None).unwrap().assembly;
        let ty = lookup_type(&asm, "Invoke.Counter").unwrap();
        let mut native = TargetObject::new();
        let object = crate::construct::create_object(native.ptr(), ty).unwrap();

        invoke_method(object, lookup_method(ty, "Bump").unwrap()).unwrap();
        let mut args = [6i32, 7, 0];
        let mut ret = 0i32;
        unsafe {
            invoke_method_buffered(
                object,
                lookup_method(ty, "Add").unwrap(),
                args.as_mut_ptr() as *mut u8,
                &mut ret as *mut i32 as *mut u8,
            )
            .unwrap()
        };
        assert_eq!(ret, 42);
        let counter = handles().resolve::<Counter>(object).unwrap();
        assert_eq!(counter.hits.load(Ordering::SeqCst), 2);

        // Buffered bodies are not reachable through the bare entry point.
        assert!(matches!(
            invoke_method(object, lookup_method(ty, "Add").unwrap()),
            Err(UmbraError::InvocationMismatch(_))
        ));
        crate::construct::dispose_object(object);
        assert!(invoke_method(object, lookup_method(ty, "Bump").unwrap()).is_err());
    }
}
