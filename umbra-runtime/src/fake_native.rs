// In-process stand-in for the native host, used by unit tests and, behind the
// `fake-native` feature, by crates that exercise woven code.
//
// One class (`Target`) with four properties and three functions, one struct
// (`Vector`), interned names and weak references. A function can be routed
// to a managed method, the way a host dispatches an overridden event. Object memory is the
// `TargetObject` layout below; native strings are Rust `String`s stored in
// place and native arrays are `Vec<u8>`s holding packed elements.

use std::ffi::c_void;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashMap;
use std::sync::{Once, OnceLock};

use parking_lot::Mutex;
use umbra_ffi::*;

use crate::api::init_api;
use crate::construct::find_shadow;
use crate::invoke::invoke_method_buffered;

#[repr(C)]
pub struct TargetObject {
    pub health: f32,
    pub last_sum: i32,
    pub label: String,
    pub scores: Vec<u8>,
}

impl TargetObject {
    pub fn new() -> Box<TargetObject> {
        Box::new(TargetObject {
            health: 0.0,
            last_sum: 0,
            label: String::new(),
            scores: Vec::new(),
        })
    }

    pub fn ptr(&mut self) -> NativeObjectPtr {
        NativeObjectPtr(self as *mut TargetObject as *mut c_void)
    }
}

#[repr(C)]
pub struct AddParams {
    pub a: i32,
    pub b: i32,
    pub return_value: i32,
}

pub struct FakeProperty {
    name: &'static str,
    offset: u32,
    size: u32,
    inner: Vec<&'static FakeProperty>,
}

pub struct FakeFunction {
    name: &'static str,
    params_size: u32,
    params: Vec<&'static FakeProperty>,
    body: fn(NativeObjectPtr, *mut u8),
}

pub struct FakeType {
    name: &'static str,
    size: u32,
    functions: Vec<&'static FakeFunction>,
    properties: Vec<&'static FakeProperty>,
}

struct World {
    types: Vec<&'static FakeType>,
    default_object: usize,
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

fn prop(name: &'static str, offset: usize, size: usize) -> &'static FakeProperty {
    leak(FakeProperty {
        name,
        offset: offset as u32,
        size: size as u32,
        inner: Vec::new(),
    })
}

fn add_body(object: NativeObjectPtr, params: *mut u8) {
    let params = unsafe { &mut *(params as *mut AddParams) };
    params.return_value = params.a + params.b;
    if !object.is_null() {
        unsafe { (*(object.0 as *mut TargetObject)).last_sum = params.return_value };
    }
}

fn double_body(_: NativeObjectPtr, params: *mut u8) {
    let value = unsafe { &mut *(params as *mut i32) };
    *value *= 2;
}

#[repr(C)]
pub struct SwapParams {
    pub left: i32,
    pub right: i32,
}

fn swap_body(_: NativeObjectPtr, params: *mut u8) {
    let params = unsafe { &mut *(params as *mut SwapParams) };
    std::mem::swap(&mut params.left, &mut params.right);
}

fn world() -> &'static World {
    static WORLD: OnceLock<World> = OnceLock::new();
    WORLD.get_or_init(|| {
        let scores = leak(FakeProperty {
            name: "Scores",
            offset: offset_of!(TargetObject, scores) as u32,
            size: size_of::<Vec<u8>>() as u32,
            inner: vec![prop("Scores.Inner", 0, 4)],
        });
        let add = leak(FakeFunction {
            name: "Add",
            params_size: size_of::<AddParams>() as u32,
            params: vec![
                prop("A", offset_of!(AddParams, a), 4),
                prop("B", offset_of!(AddParams, b), 4),
                prop("ReturnValue", offset_of!(AddParams, return_value), 4),
            ],
            body: add_body,
        });
        let double = leak(FakeFunction {
            name: "Double",
            params_size: 4,
            params: vec![prop("Value", 0, 4)],
            body: double_body,
        });
        let swap = leak(FakeFunction {
            name: "Swap",
            params_size: size_of::<SwapParams>() as u32,
            params: vec![
                prop("Left", offset_of!(SwapParams, left), 4),
                prop("Right", offset_of!(SwapParams, right), 4),
            ],
            body: swap_body,
        });
        let target = leak(FakeType {
            name: "Target",
            size: size_of::<TargetObject>() as u32,
            functions: vec![add, double, swap],
            properties: vec![
                prop("Health", offset_of!(TargetObject, health), 4),
                prop("LastSum", offset_of!(TargetObject, last_sum), 4),
                prop("Label", offset_of!(TargetObject, label), size_of::<String>()),
                scores,
            ],
        });
        let vector = leak(FakeType {
            name: "Vector",
            size: 12,
            functions: Vec::new(),
            properties: vec![prop("X", 0, 4), prop("Y", 4, 4), prop("Z", 8, 4)],
        });
        let default_object = Box::leak(TargetObject::new()) as *mut TargetObject as usize;
        World {
            types: vec![target, vector],
            default_object,
        }
    })
}

unsafe fn utf8<'a>(ptr: *const u8, len: u32) -> &'a str {
    unsafe { std::str::from_utf8(std::slice::from_raw_parts(ptr, len as usize)).unwrap_or("") }
}

unsafe fn utf16(ptr: *const u16, len: u32) -> String {
    unsafe { String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len as usize)) }
}

unsafe fn copy_out(text: &str, buf: *mut u16, buf_len: u32, out_len: *mut u32) -> BridgeStatus {
    let units: Vec<u16> = text.encode_utf16().collect();
    unsafe { *out_len = units.len() as u32 };
    if units.len() > buf_len as usize {
        return BridgeStatus::BufferTooSmall;
    }
    unsafe { std::ptr::copy_nonoverlapping(units.as_ptr(), buf, units.len()) };
    BridgeStatus::Ok
}

fn find_type(name: &str) -> *mut c_void {
    world()
        .types
        .iter()
        .find(|t| t.name == name)
        .map_or(std::ptr::null_mut(), |t| *t as *const FakeType as *mut c_void)
}

// ---------------------------------------------------------------------------
// Sub-tables
// ---------------------------------------------------------------------------

unsafe extern "C" fn log(_level: u8, _msg: *const u8, _len: u32) {}

unsafe extern "C" fn find_class(name: *const u8, len: u32) -> NativeClassPtr {
    NativeClassPtr(find_type(unsafe { utf8(name, len) }))
}

unsafe extern "C" fn find_struct(name: *const u8, len: u32) -> NativeStructPtr {
    NativeStructPtr(find_type(unsafe { utf8(name, len) }))
}

unsafe extern "C" fn find_function(class: NativeClassPtr, name: *const u8, len: u32) -> NativeFunctionPtr {
    let ty = unsafe { &*(class.0 as *const FakeType) };
    let name = unsafe { utf8(name, len) };
    *lookups().lock().entry(name.to_string()).or_default() += 1;
    ty.functions
        .iter()
        .find(|f| f.name == name)
        .map_or(NativeFunctionPtr::null(), |f| NativeFunctionPtr(*f as *const FakeFunction as *mut c_void))
}

fn prop_ptr(p: &&'static FakeProperty) -> NativePropertyPtr {
    NativePropertyPtr(*p as *const FakeProperty as *mut c_void)
}

unsafe extern "C" fn find_property(owner: *mut c_void, name: *const u8, len: u32) -> NativePropertyPtr {
    let ty = unsafe { &*(owner as *const FakeType) };
    let name = unsafe { utf8(name, len) };
    ty.properties
        .iter()
        .find(|p| p.name == name)
        .map_or(NativePropertyPtr::null(), prop_ptr)
}

unsafe extern "C" fn find_function_param(func: NativeFunctionPtr, name: *const u8, len: u32) -> NativePropertyPtr {
    let func = unsafe { &*(func.0 as *const FakeFunction) };
    let name = unsafe { utf8(name, len) };
    func.params
        .iter()
        .find(|p| p.name == name)
        .map_or(NativePropertyPtr::null(), prop_ptr)
}

unsafe extern "C" fn property_offset(prop: NativePropertyPtr) -> u32 {
    unsafe { (*(prop.0 as *const FakeProperty)).offset }
}

unsafe extern "C" fn property_size(prop: NativePropertyPtr) -> u32 {
    unsafe { (*(prop.0 as *const FakeProperty)).size }
}

unsafe extern "C" fn inner_property(prop: NativePropertyPtr, index: u32) -> NativePropertyPtr {
    let prop = unsafe { &*(prop.0 as *const FakeProperty) };
    prop.inner.get(index as usize).map_or(NativePropertyPtr::null(), prop_ptr)
}

unsafe extern "C" fn function_params_size(func: NativeFunctionPtr) -> u32 {
    unsafe { (*(func.0 as *const FakeFunction)).params_size }
}

unsafe extern "C" fn struct_size(s: NativeStructPtr) -> u32 {
    unsafe { (*(s.0 as *const FakeType)).size }
}

unsafe extern "C" fn class_of(_obj: NativeObjectPtr) -> NativeClassPtr {
    NativeClassPtr(find_type("Target"))
}

unsafe extern "C" fn invoke_function(obj: NativeObjectPtr, func: NativeFunctionPtr, params: *mut u8) -> BridgeStatus {
    if func.is_null() {
        return BridgeStatus::NullArgument;
    }
    let routed = routes().lock().get(&func.addr()).copied();
    let func = unsafe { &*(func.0 as *const FakeFunction) };
    let Some(method) = routed else {
        (func.body)(obj, params);
        return BridgeStatus::Ok;
    };
    let Some(object) = find_shadow(obj) else {
        return BridgeStatus::InvalidHandle;
    };
    let ret = func
        .params
        .iter()
        .find(|p| p.name == "ReturnValue")
        .map_or(std::ptr::null_mut(), |p| unsafe { params.add(p.offset as usize) });
    match unsafe { invoke_method_buffered(object, method, params, ret) } {
        Ok(()) => BridgeStatus::Ok,
        Err(err) => err.status(),
    }
}

fn routes() -> &'static Mutex<HashMap<usize, GcHandle>> {
    static ROUTES: OnceLock<Mutex<HashMap<usize, GcHandle>>> = OnceLock::new();
    ROUTES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lookups() -> &'static Mutex<HashMap<String, usize>> {
    static LOOKUPS: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();
    LOOKUPS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Dispatch `Target.<function>` to a managed method instead of its native
/// body. The receiver is the shadow object of the native target.
pub fn route_to_managed(function: &str, method: GcHandle) {
    let Some(func) = world()
        .types
        .iter()
        .flat_map(|t| t.functions.iter())
        .find(|f| f.name == function)
    else {
        panic!("fake native has no function `{function}`");
    };
    routes().lock().insert(*func as *const FakeFunction as usize, method);
}

/// How often native code was asked to look up a function by this name.
pub fn function_lookups(function: &str) -> usize {
    lookups().lock().get(function).copied().unwrap_or(0)
}

unsafe extern "C" fn class_default_object(_class: NativeClassPtr) -> NativeObjectPtr {
    NativeObjectPtr(world().default_object as *mut c_void)
}

unsafe extern "C" fn is_valid(obj: NativeObjectPtr) -> bool {
    !obj.is_null()
}

fn weak_table() -> &'static Mutex<Vec<usize>> {
    static WEAK: OnceLock<Mutex<Vec<usize>>> = OnceLock::new();
    WEAK.get_or_init(|| Mutex::new(Vec::new()))
}

unsafe extern "C" fn make_weak(obj: NativeObjectPtr) -> WeakObjectHandle {
    let mut table = weak_table().lock();
    table.push(obj.addr());
    WeakObjectHandle {
        object_index: table.len() as i32 - 1,
        object_serial_number: 1,
    }
}

unsafe extern "C" fn resolve_weak(weak: WeakObjectHandle) -> NativeObjectPtr {
    let table = weak_table().lock();
    table
        .get(weak.object_index as usize)
        .map_or(NativeObjectPtr::null(), |addr| NativeObjectPtr(*addr as *mut c_void))
}

unsafe extern "C" fn string_get(src: *const u8, buf: *mut u16, buf_len: u32, out_len: *mut u32) -> BridgeStatus {
    let s = unsafe { &*(src as *const String) };
    unsafe { copy_out(s, buf, buf_len, out_len) }
}

unsafe extern "C" fn string_set(dst: *mut u8, chars: *const u16, len: u32) {
    unsafe { *(dst as *mut String) = utf16(chars, len) };
}

unsafe extern "C" fn interface_address(obj: NativeObjectPtr, _iface: NativeClassPtr) -> *mut c_void {
    obj.0
}

unsafe extern "C" fn name_from_chars(chars: *const u16, len: u32) -> NameHandle {
    let text = unsafe { utf16(chars, len) };
    let mut names = names().lock();
    let index = match names.iter().position(|n| *n == text) {
        Some(i) => i,
        None => {
            names.push(text);
            names.len() - 1
        }
    };
    NameHandle(index as u64 + 1)
}

unsafe extern "C" fn name_to_chars(name: NameHandle, buf: *mut u16, buf_len: u32, out_len: *mut u32) -> BridgeStatus {
    let names = names().lock();
    let text = match name.0 {
        0 => "None",
        n => names.get(n as usize - 1).map_or("None", |s| s.as_str()),
    };
    unsafe { copy_out(text, buf, buf_len, out_len) }
}

fn names() -> &'static Mutex<Vec<String>> {
    static NAMES: OnceLock<Mutex<Vec<String>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(Vec::new()))
}

pub static PARAMS_INITIALIZED: AtomicUsize = AtomicUsize::new(0);
pub static PARAMS_DESTROYED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn alloc_struct(s: NativeStructPtr) -> *mut u8 {
    let size = unsafe { struct_size(s) } as usize;
    Box::into_raw(vec![0u8; size].into_boxed_slice()) as *mut u8
}

unsafe extern "C" fn free_struct(s: NativeStructPtr, ptr: *mut u8) {
    let size = unsafe { struct_size(s) } as usize;
    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, size)) });
}

unsafe extern "C" fn alloc_value(prop: NativePropertyPtr) -> *mut u8 {
    let size = unsafe { property_size(prop) } as usize;
    Box::into_raw(vec![0u8; size].into_boxed_slice()) as *mut u8
}

unsafe extern "C" fn free_value(prop: NativePropertyPtr, ptr: *mut u8) {
    let size = unsafe { property_size(prop) } as usize;
    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, size)) });
}

unsafe extern "C" fn init_params(_func: NativeFunctionPtr, _params: *mut u8) {
    PARAMS_INITIALIZED.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn destroy_params(_func: NativeFunctionPtr, _params: *mut u8) {
    PARAMS_DESTROYED.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn soft_path_get(src: *const u8, buf: *mut u16, buf_len: u32, out_len: *mut u32) -> BridgeStatus {
    unsafe { string_get(src, buf, buf_len, out_len) }
}

unsafe extern "C" fn array_num(arr: *const u8, prop: NativePropertyPtr) -> i32 {
    let elem = unsafe { property_size(inner_property(prop, 0)) } as usize;
    (unsafe { &*(arr as *const Vec<u8>) }.len() / elem) as i32
}

unsafe extern "C" fn array_data(arr: *const u8, _prop: NativePropertyPtr) -> *mut u8 {
    unsafe { (*(arr as *mut Vec<u8>)).as_mut_ptr() }
}

unsafe extern "C" fn array_resize(arr: *mut u8, prop: NativePropertyPtr, new_num: i32) {
    let elem = unsafe { property_size(inner_property(prop, 0)) } as usize;
    unsafe { (*(arr as *mut Vec<u8>)).resize(new_num.max(0) as usize * elem, 0) };
}

unsafe extern "C" fn unused_num(_: *const u8, _: NativePropertyPtr) -> i32 {
    0
}

unsafe extern "C" fn unused_element(_: *const u8, _: NativePropertyPtr, _: i32) -> *const u8 {
    std::ptr::null()
}

unsafe extern "C" fn unused_empty(_: *mut u8, _: NativePropertyPtr) {}

unsafe extern "C" fn unused_set_add(_: *mut u8, _: NativePropertyPtr, _: *const u8) {}

unsafe extern "C" fn unused_map_add(_: *mut u8, _: NativePropertyPtr, _: *const u8, _: *const u8) {}

static LOGGING: NativeLoggingApi = NativeLoggingApi { log };

static REFLECTION: NativeReflectionApi = NativeReflectionApi {
    find_class,
    find_struct,
    find_function,
    find_property,
    find_function_param,
    property_offset,
    property_size,
    inner_property,
    function_params_size,
    struct_size,
    class_of,
};

static OBJECT: NativeObjectApi = NativeObjectApi {
    invoke_function,
    class_default_object,
    is_valid,
    make_weak,
    resolve_weak,
    soft_path_get,
    soft_path_set: string_set,
    interface_address,
};

static MEMORY: NativeMemoryApi = NativeMemoryApi {
    alloc_struct,
    free_struct,
    alloc_value,
    free_value,
    init_params,
    destroy_params,
};

static STRING: NativeStringApi = NativeStringApi {
    string_get,
    string_set,
    text_get: string_get,
    text_set: string_set,
    name_from_chars,
    name_to_chars,
};

static CONTAINER: NativeContainerApi = NativeContainerApi {
    array_num,
    array_data,
    array_resize,
    set_num: unused_num,
    set_element: unused_element,
    set_empty: unused_empty,
    set_add: unused_set_add,
    map_num: unused_num,
    map_key: unused_element,
    map_value: unused_element,
    map_empty: unused_empty,
    map_add: unused_map_add,
};

static API: NativeApi = NativeApi {
    version: NATIVE_API_VERSION,
    logging: &LOGGING,
    reflection: &REFLECTION,
    object: &OBJECT,
    memory: &MEMORY,
    string: &STRING,
    container: &CONTAINER,
};

/// Install the fake table as the process-wide native API. Safe to call from every test.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if let Err(err) = init_api(&API) {
            panic!("fake native API: {err}");
        }
    });
}
