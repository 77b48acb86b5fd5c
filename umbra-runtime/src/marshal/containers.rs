// Container marshalers: arrays, sets, maps and optionals.
//
// Element layout comes from the container property's inner properties
// (index 0 for elements and keys, 1 for map values).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;

use umbra_ffi::NativePropertyPtr;

use crate::api::{containers, memory, reflection};

use super::Marshaller;

fn inner(prop: NativePropertyPtr, index: u32) -> NativePropertyPtr {
    unsafe { (reflection().inner_property)(prop, index) }
}

fn stride(prop: NativePropertyPtr) -> usize {
    unsafe { (reflection().property_size)(prop) as usize }
}

/// Marshal one element through a temporary native value, then release it.
fn with_temp<M: Marshaller>(prop: NativePropertyPtr, value: &M::Value, f: impl FnOnce(*const u8)) {
    let tmp = unsafe { (memory().alloc_value)(prop) };
    unsafe { M::to_native(value, tmp, prop) };
    f(tmp);
    unsafe { (memory().free_value)(prop, tmp) };
}

pub struct ArrayMarshaller<M>(PhantomData<M>);

impl<M: Marshaller> Marshaller for ArrayMarshaller<M> {
    type Value = Vec<M::Value>;

    unsafe fn to_native(value: &Vec<M::Value>, dst: *mut u8, prop: NativePropertyPtr) {
        let elem = inner(prop, 0);
        unsafe {
            (containers().array_resize)(dst, prop, value.len() as i32);
            let data = (containers().array_data)(dst, prop);
            M::write_elements(value, data, stride(elem), elem);
        }
    }

    unsafe fn from_native(src: *const u8, prop: NativePropertyPtr) -> Vec<M::Value> {
        let elem = inner(prop, 0);
        unsafe {
            let count = (containers().array_num)(src, prop).max(0) as usize;
            let data = (containers().array_data)(src, prop);
            M::read_elements(data, count, stride(elem), elem)
        }
    }
}

pub struct SetMarshaller<M>(PhantomData<M>);

impl<M> Marshaller for SetMarshaller<M>
where
    M: Marshaller,
    M::Value: Eq + Hash,
{
    type Value = HashSet<M::Value>;

    unsafe fn to_native(value: &HashSet<M::Value>, dst: *mut u8, prop: NativePropertyPtr) {
        let elem = inner(prop, 0);
        unsafe { (containers().set_empty)(dst, prop) };
        for item in value {
            with_temp::<M>(elem, item, |tmp| unsafe { (containers().set_add)(dst, prop, tmp) });
        }
    }

    unsafe fn from_native(src: *const u8, prop: NativePropertyPtr) -> HashSet<M::Value> {
        let elem = inner(prop, 0);
        let count = unsafe { (containers().set_num)(src, prop) };
        (0..count)
            .map(|i| unsafe { M::from_native((containers().set_element)(src, prop, i), elem) })
            .collect()
    }
}

pub struct MapMarshaller<K, V>(PhantomData<(K, V)>);

impl<K, V> Marshaller for MapMarshaller<K, V>
where
    K: Marshaller,
    K::Value: Eq + Hash,
    V: Marshaller,
{
    type Value = HashMap<K::Value, V::Value>;

    unsafe fn to_native(value: &HashMap<K::Value, V::Value>, dst: *mut u8, prop: NativePropertyPtr) {
        let (key_prop, value_prop) = (inner(prop, 0), inner(prop, 1));
        unsafe { (containers().map_empty)(dst, prop) };
        for (k, v) in value {
            with_temp::<K>(key_prop, k, |key| {
                with_temp::<V>(value_prop, v, |val| unsafe { (containers().map_add)(dst, prop, key, val) });
            });
        }
    }

    unsafe fn from_native(src: *const u8, prop: NativePropertyPtr) -> HashMap<K::Value, V::Value> {
        let (key_prop, value_prop) = (inner(prop, 0), inner(prop, 1));
        let count = unsafe { (containers().map_num)(src, prop) };
        (0..count)
            .map(|i| unsafe {
                let key = K::from_native((containers().map_key)(src, prop, i), key_prop);
                let value = V::from_native((containers().map_value)(src, prop, i), value_prop);
                (key, value)
            })
            .collect()
    }
}

/// Native optionals store the value followed by a one-byte "is set" flag.
pub struct OptionalMarshaller<M>(PhantomData<M>);

impl<M: Marshaller> Marshaller for OptionalMarshaller<M> {
    type Value = Option<M::Value>;

    unsafe fn to_native(value: &Option<M::Value>, dst: *mut u8, prop: NativePropertyPtr) {
        let elem = inner(prop, 0);
        let flag = unsafe { dst.add(stride(elem)) };
        match value {
            Some(v) => unsafe {
                M::to_native(v, dst, elem);
                *flag = 1;
            },
            None => unsafe { *flag = 0 },
        }
    }

    unsafe fn from_native(src: *const u8, prop: NativePropertyPtr) -> Option<M::Value> {
        let elem = inner(prop, 0);
        let is_set = unsafe { *src.add(stride(elem)) != 0 };
        is_set.then(|| unsafe { M::from_native(src, elem) })
    }
}
