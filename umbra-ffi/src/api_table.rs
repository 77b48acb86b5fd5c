use std::ffi::c_void;

use crate::error::BridgeStatus;
use crate::handles::*;

/// Layout revision of [`NativeApi`]. Bumped whenever a slot is added or reordered.
pub const NATIVE_API_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Main API table
// ---------------------------------------------------------------------------

/// Table of native services handed to the bridge by `umbra_init`.
/// Every sub-table pointer is non-null and outlives the bridge.
#[repr(C)]
pub struct NativeApi {
    pub version: u32,
    pub logging: *const NativeLoggingApi,
    pub reflection: *const NativeReflectionApi,
    pub object: *const NativeObjectApi,
    pub memory: *const NativeMemoryApi,
    pub string: *const NativeStringApi,
    pub container: *const NativeContainerApi,
}

unsafe impl Send for NativeApi {}
unsafe impl Sync for NativeApi {}

// ---------------------------------------------------------------------------
// NativeLoggingApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct NativeLoggingApi {
    /// `level`: 0 = display, 1 = warning, 2 = error.
    /// `msg` is UTF-8 and not null-terminated.
    pub log: unsafe extern "C" fn(level: u8, msg: *const u8, msg_len: u32),
}

// ---------------------------------------------------------------------------
// NativeReflectionApi
// ---------------------------------------------------------------------------

/// Name-based lookups. Names are UTF-8 byte slices (not null-terminated);
/// every lookup returns a null handle on a miss.
#[repr(C)]
pub struct NativeReflectionApi {
    pub find_class: unsafe extern "C" fn(name: *const u8, name_len: u32) -> NativeClassPtr,
    pub find_struct: unsafe extern "C" fn(name: *const u8, name_len: u32) -> NativeStructPtr,
    pub find_function: unsafe extern "C" fn(
        class: NativeClassPtr,
        name: *const u8,
        name_len: u32,
    ) -> NativeFunctionPtr,
    /// `owner` is a class or struct pointer.
    pub find_property: unsafe extern "C" fn(
        owner: *mut c_void,
        name: *const u8,
        name_len: u32,
    ) -> NativePropertyPtr,
    /// Parameter (or `ReturnValue`) of a function.
    pub find_function_param: unsafe extern "C" fn(
        func: NativeFunctionPtr,
        name: *const u8,
        name_len: u32,
    ) -> NativePropertyPtr,
    pub property_offset: unsafe extern "C" fn(prop: NativePropertyPtr) -> u32,
    /// Byte size of one value of the property's type (the element stride in containers).
    pub property_size: unsafe extern "C" fn(prop: NativePropertyPtr) -> u32,
    /// Element (`index` 0) or value (`index` 1, maps only) property of a container property.
    pub inner_property: unsafe extern "C" fn(prop: NativePropertyPtr, index: u32) -> NativePropertyPtr,
    /// Size of the parameter block native code expects for `func`.
    pub function_params_size: unsafe extern "C" fn(func: NativeFunctionPtr) -> u32,
    pub struct_size: unsafe extern "C" fn(s: NativeStructPtr) -> u32,
    pub class_of: unsafe extern "C" fn(obj: NativeObjectPtr) -> NativeClassPtr,
}

// ---------------------------------------------------------------------------
// NativeObjectApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct NativeObjectApi {
    /// Run `func` on `obj` with a caller-owned parameter block.
    pub invoke_function: unsafe extern "C" fn(
        obj: NativeObjectPtr,
        func: NativeFunctionPtr,
        params: *mut u8,
    ) -> BridgeStatus,
    /// Default object of a class; the receiver of static function calls.
    pub class_default_object: unsafe extern "C" fn(class: NativeClassPtr) -> NativeObjectPtr,
    pub is_valid: unsafe extern "C" fn(obj: NativeObjectPtr) -> bool,
    pub make_weak: unsafe extern "C" fn(obj: NativeObjectPtr) -> WeakObjectHandle,
    pub resolve_weak: unsafe extern "C" fn(weak: WeakObjectHandle) -> NativeObjectPtr,
    /// Read the object path held by a soft reference at `src` (UTF-16).
    pub soft_path_get: unsafe extern "C" fn(
        src: *const u8,
        buf: *mut u16,
        buf_len: u32,
        out_len: *mut u32,
    ) -> BridgeStatus,
    pub soft_path_set: unsafe extern "C" fn(dst: *mut u8, path: *const u16, path_len: u32),
    /// Address of the interface sub-object of `obj`, or null when not implemented.
    pub interface_address: unsafe extern "C" fn(
        obj: NativeObjectPtr,
        interface_class: NativeClassPtr,
    ) -> *mut c_void,
}

// ---------------------------------------------------------------------------
// NativeMemoryApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct NativeMemoryApi {
    /// Allocate and default-construct one struct value.
    pub alloc_struct: unsafe extern "C" fn(s: NativeStructPtr) -> *mut u8,
    pub free_struct: unsafe extern "C" fn(s: NativeStructPtr, ptr: *mut u8),
    /// Allocate and construct one value of a property's type (container scratch space).
    pub alloc_value: unsafe extern "C" fn(prop: NativePropertyPtr) -> *mut u8,
    pub free_value: unsafe extern "C" fn(prop: NativePropertyPtr, ptr: *mut u8),
    /// Construct every parameter in a zeroed block of `function_params_size` bytes.
    pub init_params: unsafe extern "C" fn(func: NativeFunctionPtr, params: *mut u8),
    /// Destroy every parameter in a block built by `init_params`.
    pub destroy_params: unsafe extern "C" fn(func: NativeFunctionPtr, params: *mut u8),
}

// ---------------------------------------------------------------------------
// NativeStringApi
// ---------------------------------------------------------------------------

/// Native string, name and text values. Characters are UTF-16 code units.
#[repr(C)]
pub struct NativeStringApi {
    pub string_get: unsafe extern "C" fn(
        src: *const u8,
        buf: *mut u16,
        buf_len: u32,
        out_len: *mut u32,
    ) -> BridgeStatus,
    pub string_set: unsafe extern "C" fn(dst: *mut u8, chars: *const u16, len: u32),
    pub text_get: unsafe extern "C" fn(
        src: *const u8,
        buf: *mut u16,
        buf_len: u32,
        out_len: *mut u32,
    ) -> BridgeStatus,
    pub text_set: unsafe extern "C" fn(dst: *mut u8, chars: *const u16, len: u32),
    pub name_from_chars: unsafe extern "C" fn(chars: *const u16, len: u32) -> NameHandle,
    pub name_to_chars: unsafe extern "C" fn(
        name: NameHandle,
        buf: *mut u16,
        buf_len: u32,
        out_len: *mut u32,
    ) -> BridgeStatus,
}

// ---------------------------------------------------------------------------
// NativeContainerApi
// ---------------------------------------------------------------------------

/// Arrays, sets and maps living inside native memory. `prop` is the container
/// property; element layout is derived from it by the native side.
#[repr(C)]
pub struct NativeContainerApi {
    pub array_num: unsafe extern "C" fn(arr: *const u8, prop: NativePropertyPtr) -> i32,
    pub array_data: unsafe extern "C" fn(arr: *const u8, prop: NativePropertyPtr) -> *mut u8,
    /// Grow or shrink, constructing/destroying elements as needed.
    pub array_resize: unsafe extern "C" fn(arr: *mut u8, prop: NativePropertyPtr, new_num: i32),

    pub set_num: unsafe extern "C" fn(set: *const u8, prop: NativePropertyPtr) -> i32,
    /// Element at logical position `index` (holes are skipped by the native side).
    pub set_element: unsafe extern "C" fn(set: *const u8, prop: NativePropertyPtr, index: i32) -> *const u8,
    pub set_empty: unsafe extern "C" fn(set: *mut u8, prop: NativePropertyPtr),
    pub set_add: unsafe extern "C" fn(set: *mut u8, prop: NativePropertyPtr, elem: *const u8),

    pub map_num: unsafe extern "C" fn(map: *const u8, prop: NativePropertyPtr) -> i32,
    pub map_key: unsafe extern "C" fn(map: *const u8, prop: NativePropertyPtr, index: i32) -> *const u8,
    pub map_value: unsafe extern "C" fn(map: *const u8, prop: NativePropertyPtr, index: i32) -> *const u8,
    pub map_empty: unsafe extern "C" fn(map: *mut u8, prop: NativePropertyPtr),
    pub map_add: unsafe extern "C" fn(
        map: *mut u8,
        prop: NativePropertyPtr,
        key: *const u8,
        value: *const u8,
    ),
}
