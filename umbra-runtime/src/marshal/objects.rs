// Object-reference marshalers.

use std::ffi::c_void;
use std::marker::PhantomData;

use umbra_ffi::{NativeClassPtr, NativeObjectPtr, NativePropertyPtr};

use crate::api::object;
use crate::object_ref::{ObjectRef, ScriptInterface, SoftObjectRef, SubclassOf, WeakObjectRef};
use crate::values::Delegate;
use crate::wide::read_native_chars;

use super::{Blittable, Marshaller};

pub type ObjectMarshaller<T> = Blittable<ObjectRef<T>>;
pub type ClassMarshaller<T> = Blittable<SubclassOf<T>>;
pub type WeakObjectMarshaller<T> = Blittable<WeakObjectRef<T>>;
pub type DelegateMarshaller<F> = Blittable<Delegate<F>>;

pub struct SoftObjectMarshaller<T: ?Sized>(PhantomData<fn() -> T>);

impl<T: ?Sized> Marshaller for SoftObjectMarshaller<T> {
    type Value = SoftObjectRef<T>;

    unsafe fn to_native(value: &SoftObjectRef<T>, dst: *mut u8, _prop: NativePropertyPtr) {
        let units: Vec<u16> = value.path().encode_utf16().collect();
        unsafe { (object().soft_path_set)(dst, units.as_ptr(), units.len() as u32) }
    }

    unsafe fn from_native(src: *const u8, _prop: NativePropertyPtr) -> SoftObjectRef<T> {
        SoftObjectRef::new(read_native_chars(|buf, cap, out| unsafe {
            (object().soft_path_get)(src, buf, cap, out)
        }))
    }
}

/// Implemented by woven interfaces: the native class describing the interface.
pub trait NativeInterface {
    fn native_class() -> NativeClassPtr;
}

/// Native interface values are an object pointer followed by the address of
/// the interface inside that object.
pub struct InterfaceMarshaller<T: ?Sized>(PhantomData<fn() -> T>);

impl<T: NativeInterface + ?Sized> Marshaller for InterfaceMarshaller<T> {
    type Value = ScriptInterface<T>;

    unsafe fn to_native(value: &ScriptInterface<T>, dst: *mut u8, _prop: NativePropertyPtr) {
        let target = value.object().native_ptr();
        let address = if target.is_null() {
            std::ptr::null_mut()
        } else {
            unsafe { (object().interface_address)(target, T::native_class()) }
        };
        unsafe {
            std::ptr::write_unaligned(dst as *mut *mut c_void, target.0);
            std::ptr::write_unaligned(dst.add(size_of::<usize>()) as *mut *mut c_void, address);
        }
    }

    unsafe fn from_native(src: *const u8, _prop: NativePropertyPtr) -> ScriptInterface<T> {
        let target = unsafe { std::ptr::read_unaligned(src as *const *mut c_void) };
        ScriptInterface::new(ObjectRef::from_native(NativeObjectPtr(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_native::{self, TargetObject};

    struct Damageable;

    impl NativeInterface for Damageable {
        fn native_class() -> NativeClassPtr {
            NativeClassPtr::null()
        }
    }

    #[test]
    fn interface_value_carries_object_and_address() {
        fake_native::install();
        let mut native = TargetObject::new();
        let value = ScriptInterface::<Damageable>::new(ObjectRef::from_native(native.ptr()));
        let mut slot = [0usize; 2];
        unsafe {
            InterfaceMarshaller::<Damageable>::to_native(&value, slot.as_mut_ptr() as *mut u8, NativePropertyPtr::null());
            assert_eq!(slot[0], native.ptr().addr());
            let back = InterfaceMarshaller::<Damageable>::from_native(slot.as_ptr() as *const u8, NativePropertyPtr::null());
            assert_eq!(back, value);
        }
    }

    #[test]
    fn weak_reference_upgrades_through_native() {
        fake_native::install();
        let mut native = TargetObject::new();
        let strong = ObjectRef::<()>::from_native(native.ptr());
        let weak = WeakObjectRef::new(strong);
        assert_eq!(weak.upgrade(), strong);
        assert!(WeakObjectRef::<()>::default().upgrade().is_null());
    }
}
