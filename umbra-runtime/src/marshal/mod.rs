// Marshalers: move values between managed types and native memory.
//
// Each property kind has a zero-sized marshaler type implementing
// `Marshaller`. Woven code names the marshaler for every parameter and
// property it touches; containers compose them (`ArrayMarshaller<Blittable<i32>>`).

mod containers;
mod objects;
mod strings;

pub use containers::{ArrayMarshaller, MapMarshaller, OptionalMarshaller, SetMarshaller};
pub use objects::{
    ClassMarshaller, DelegateMarshaller, InterfaceMarshaller, NativeInterface, ObjectMarshaller,
    SoftObjectMarshaller, WeakObjectMarshaller,
};
pub use strings::{NameMarshaller, StringMarshaller, TextMarshaller};

use std::marker::PhantomData;

use umbra_ffi::{NativeObjectPtr, NativePropertyPtr};

use crate::bindings::{PropertyBinding, ResolvedParam};
use crate::object::ObjectBase;

pub trait Marshaller {
    type Value;

    /// Write `value` into native memory at `dst`.
    ///
    /// # Safety
    /// `dst` must point at initialised native storage for `prop`.
    unsafe fn to_native(value: &Self::Value, dst: *mut u8, prop: NativePropertyPtr);

    /// Read a value out of native memory at `src`.
    ///
    /// # Safety
    /// `src` must point at initialised native storage for `prop`.
    unsafe fn from_native(src: *const u8, prop: NativePropertyPtr) -> Self::Value;

    /// Read `count` elements spaced `stride` bytes apart.
    ///
    /// # Safety
    /// `src` must hold `count` initialised elements of `prop`.
    unsafe fn read_elements(src: *const u8, count: usize, stride: usize, prop: NativePropertyPtr) -> Vec<Self::Value> {
        (0..count)
            .map(|i| unsafe { Self::from_native(src.add(i * stride), prop) })
            .collect()
    }

    /// Write `values` as elements spaced `stride` bytes apart.
    ///
    /// # Safety
    /// `dst` must hold `values.len()` initialised elements of `prop`.
    unsafe fn write_elements(values: &[Self::Value], dst: *mut u8, stride: usize, prop: NativePropertyPtr) {
        for (i, value) in values.iter().enumerate() {
            unsafe { Self::to_native(value, dst.add(i * stride), prop) };
        }
    }
}

// ---------------------------------------------------------------------------
// Blittable values
// ---------------------------------------------------------------------------

/// Types whose native representation is their own bytes.
///
/// # Safety
/// The implementor must be `#[repr(C)]` or `#[repr(transparent)]` with the
/// exact size and layout of its native counterpart.
pub unsafe trait BlittableValue: Copy + 'static {}

macro_rules! impl_blittable {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl BlittableValue for $ty {})*
    };
}

impl_blittable!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);
impl_blittable!(crate::values::Name, crate::values::ScriptDelegate);
unsafe impl<T: ?Sized + 'static> BlittableValue for crate::object_ref::ObjectRef<T> {}
unsafe impl<T: ?Sized + 'static> BlittableValue for crate::object_ref::SubclassOf<T> {}
unsafe impl<T: ?Sized + 'static> BlittableValue for crate::object_ref::WeakObjectRef<T> {}
unsafe impl<F: ?Sized + 'static> BlittableValue for crate::values::Delegate<F> {}

/// Bulk-copy marshaler for blittable values.
pub struct Blittable<T>(PhantomData<T>);

impl<T: BlittableValue> Marshaller for Blittable<T> {
    type Value = T;

    unsafe fn to_native(value: &T, dst: *mut u8, _prop: NativePropertyPtr) {
        unsafe { std::ptr::write_unaligned(dst as *mut T, *value) }
    }

    unsafe fn from_native(src: *const u8, _prop: NativePropertyPtr) -> T {
        unsafe { std::ptr::read_unaligned(src as *const T) }
    }

    unsafe fn read_elements(src: *const u8, count: usize, stride: usize, prop: NativePropertyPtr) -> Vec<T> {
        if count == 0 {
            return Vec::new();
        }
        if stride != size_of::<T>() {
            return (0..count)
                .map(|i| unsafe { Self::from_native(src.add(i * stride), prop) })
                .collect();
        }
        let mut out = Vec::<T>::with_capacity(count);
        unsafe {
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr() as *mut u8, count * stride);
            out.set_len(count);
        }
        out
    }

    unsafe fn write_elements(values: &[T], dst: *mut u8, stride: usize, prop: NativePropertyPtr) {
        if values.is_empty() {
            return;
        }
        if stride != size_of::<T>() {
            for (i, value) in values.iter().enumerate() {
                unsafe { Self::to_native(value, dst.add(i * stride), prop) };
            }
            return;
        }
        unsafe { std::ptr::copy_nonoverlapping(values.as_ptr() as *const u8, dst, values.len() * stride) }
    }
}

/// Native bools are one byte; any non-zero byte reads as `true`.
pub struct BoolMarshaller;

impl Marshaller for BoolMarshaller {
    type Value = bool;

    unsafe fn to_native(value: &bool, dst: *mut u8, _prop: NativePropertyPtr) {
        unsafe { *dst = *value as u8 }
    }

    unsafe fn from_native(src: *const u8, _prop: NativePropertyPtr) -> bool {
        unsafe { *src != 0 }
    }
}

/// Implemented by woven structs: names the marshaler for the struct's values.
pub trait NativeStruct: Sized + 'static {
    type Marshaller: Marshaller<Value = Self>;
}

/// Implemented by woven enums.
pub trait NativeEnum: Copy + 'static {
    type Repr: BlittableValue;

    fn to_repr(self) -> Self::Repr;

    /// Unknown discriminants map to the enum's first variant.
    fn from_repr(repr: Self::Repr) -> Self;
}

pub struct EnumMarshaller<E>(PhantomData<E>);

impl<E: NativeEnum> Marshaller for EnumMarshaller<E> {
    type Value = E;

    unsafe fn to_native(value: &E, dst: *mut u8, prop: NativePropertyPtr) {
        unsafe { Blittable::<E::Repr>::to_native(&value.to_repr(), dst, prop) }
    }

    unsafe fn from_native(src: *const u8, prop: NativePropertyPtr) -> E {
        E::from_repr(unsafe { Blittable::<E::Repr>::from_native(src, prop) })
    }
}

// ---------------------------------------------------------------------------
// Property access on shadow objects
// ---------------------------------------------------------------------------

fn field_ptr(owner: NativeObjectPtr, property: &ResolvedParam) -> *mut u8 {
    unsafe { (owner.0 as *mut u8).add(property.offset) }
}

/// Read a reflected property of the object behind `owner`.
///
/// # Panics
/// Panics if the object has been disposed or the property cannot be resolved.
pub fn read_property<M: Marshaller>(owner: &ObjectBase, binding: &PropertyBinding) -> M::Value {
    let property = binding.get();
    unsafe { M::from_native(field_ptr(owner.native_ptr(), &property), property.property) }
}

/// Write a reflected property of the object behind `owner`.
///
/// # Panics
/// Panics if the object has been disposed or the property cannot be resolved.
pub fn write_property<M: Marshaller>(owner: &ObjectBase, binding: &PropertyBinding, value: &M::Value) {
    let property = binding.get();
    unsafe { M::to_native(value, field_ptr(owner.native_ptr(), &property), property.property) }
}

/// Read a struct field from native struct memory.
///
/// # Safety
/// `buffer` must point at an initialised instance of the field's struct.
pub unsafe fn read_field<M: Marshaller>(buffer: *const u8, binding: &PropertyBinding) -> M::Value {
    let field = binding.get();
    unsafe { M::from_native(buffer.add(field.offset), field.property) }
}

/// Write a struct field into native struct memory.
///
/// # Safety
/// `buffer` must point at an initialised instance of the field's struct.
pub unsafe fn write_field<M: Marshaller>(buffer: *mut u8, binding: &PropertyBinding, value: &M::Value) {
    let field = binding.get();
    unsafe { M::to_native(value, buffer.add(field.offset), field.property) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::tests::{TARGET_HEALTH, TARGET_LABEL, TARGET_SCORES};
    use crate::fake_native::{self, TargetObject};

    #[derive(Clone, Copy, PartialEq, Debug)]
    enum Stance {
        Idle,
        Crouch,
    }

    impl NativeEnum for Stance {
        type Repr = u8;
        fn to_repr(self) -> u8 {
            self as u8
        }
        fn from_repr(repr: u8) -> Self {
            match repr {
                1 => Stance::Crouch,
                _ => Stance::Idle,
            }
        }
    }

    #[test]
    fn enum_and_bool_use_one_byte() {
        let mut byte = 0u8;
        let prop = NativePropertyPtr::null();
        unsafe {
            EnumMarshaller::<Stance>::to_native(&Stance::Crouch, &mut byte, prop);
            assert_eq!(byte, 1);
            assert_eq!(EnumMarshaller::<Stance>::from_native(&7u8, prop), Stance::Idle);
            BoolMarshaller::to_native(&true, &mut byte, prop);
            assert!(BoolMarshaller::from_native(&byte, prop));
        }
    }

    #[test]
    fn strided_blittable_elements_skip_padding() {
        // Two i32s padded to 8 bytes each.
        let raw: [i32; 4] = [1, -1, 2, -1];
        let values = unsafe {
            Blittable::<i32>::read_elements(raw.as_ptr() as *const u8, 2, 8, NativePropertyPtr::null())
        };
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn object_properties_round_trip() {
        fake_native::install();
        let mut native = TargetObject::new();
        let base = ObjectBase::new(native.ptr());

        write_property::<Blittable<f32>>(&base, &TARGET_HEALTH, &87.5);
        write_property::<StringMarshaller>(&base, &TARGET_LABEL, &"Gate ⛩".to_string());
        write_property::<ArrayMarshaller<Blittable<i32>>>(&base, &TARGET_SCORES, &vec![3, 1, 4]);

        assert_eq!(native.health, 87.5);
        assert_eq!(native.label, "Gate ⛩");
        assert_eq!(read_property::<Blittable<f32>>(&base, &TARGET_HEALTH), 87.5);
        assert_eq!(read_property::<StringMarshaller>(&base, &TARGET_LABEL), "Gate ⛩");
        assert_eq!(read_property::<ArrayMarshaller<Blittable<i32>>>(&base, &TARGET_SCORES), vec![3, 1, 4]);
        base.dispose();
    }
}
