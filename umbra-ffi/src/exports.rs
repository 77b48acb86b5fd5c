// Named export slots. Native code allocates one pointer-sized cell per managed
// entry point it wants to call and hands the bridge an array of
// (slot name, cell address) pairs at init. The bridge fills each cell by name;
// a name the bridge does not know aborts initialisation.

use std::ffi::c_void;

use crate::error::BridgeStatus;
use crate::handles::*;
use crate::api_table::NativeApi;

/// One named cell in native memory that receives a managed function pointer.
#[repr(C)]
#[derive(Debug)]
pub struct ExportSlot {
    /// Null-terminated UTF-16 slot name.
    pub name: *const u16,
    pub target: *mut *const c_void,
}

pub const SLOT_CREATE_OBJECT: &str = "CreateObject";
pub const SLOT_LOOKUP_TYPE: &str = "LookupType";
pub const SLOT_LOOKUP_METHOD: &str = "LookupMethod";
pub const SLOT_INVOKE_METHOD: &str = "InvokeMethod";
pub const SLOT_INVOKE_METHOD_BUFFERED: &str = "InvokeMethodBuffered";
pub const SLOT_INVOKE_DELEGATE: &str = "InvokeDelegate";
pub const SLOT_FREE_HANDLE: &str = "FreeHandle";
pub const SLOT_DISPOSE_OBJECT: &str = "DisposeObject";
pub const SLOT_FIND_ASSEMBLY: &str = "FindAssembly";
pub const SLOT_LOAD_PLUGIN: &str = "LoadPlugin";
pub const SLOT_UNLOAD_PLUGIN: &str = "UnloadPlugin";
pub const SLOT_IS_PLUGIN_LOADED: &str = "IsPluginLoaded";
pub const SLOT_RUN_STARTUP_JOBS: &str = "RunStartupJobs";

/// Every slot name the bridge can fill.
pub const ALL_SLOTS: &[&str] = &[
    SLOT_CREATE_OBJECT,
    SLOT_LOOKUP_TYPE,
    SLOT_LOOKUP_METHOD,
    SLOT_INVOKE_METHOD,
    SLOT_INVOKE_METHOD_BUFFERED,
    SLOT_INVOKE_DELEGATE,
    SLOT_FREE_HANDLE,
    SLOT_DISPOSE_OBJECT,
    SLOT_FIND_ASSEMBLY,
    SLOT_LOAD_PLUGIN,
    SLOT_UNLOAD_PLUGIN,
    SLOT_IS_PLUGIN_LOADED,
    SLOT_RUN_STARTUP_JOBS,
];

// ---------------------------------------------------------------------------
// Slot signatures
// ---------------------------------------------------------------------------

/// Build the managed shadow of `native` using the type behind `type_handle`.
/// Returns the strong object handle, or null with a message in `error`.
pub type CreateObjectFn = unsafe extern "C" fn(
    native: NativeObjectPtr,
    type_handle: GcHandle,
    error: *mut ErrorBuffer,
) -> GcHandle;

/// Type by native full name inside an assembly. Null handle when absent.
pub type LookupTypeFn = unsafe extern "C" fn(
    assembly: GcHandle,
    full_name: *const u16,
    error: *mut ErrorBuffer,
) -> GcHandle;

/// Method by name on a type or any of its ancestors. Null handle when absent.
pub type LookupMethodFn = unsafe extern "C" fn(
    type_handle: GcHandle,
    method_name: *const u16,
    error: *mut ErrorBuffer,
) -> GcHandle;

pub type InvokeMethodFn = unsafe extern "C" fn(
    object: GcHandle,
    method: GcHandle,
    error: *mut ErrorBuffer,
) -> BridgeStatus;

/// `args` is the native parameter block; `ret` receives the return value when non-null.
pub type InvokeMethodBufferedFn = unsafe extern "C" fn(
    object: GcHandle,
    method: GcHandle,
    args: *mut u8,
    ret: *mut u8,
    error: *mut ErrorBuffer,
) -> BridgeStatus;

pub type InvokeDelegateFn = unsafe extern "C" fn(delegate: GcHandle, error: *mut ErrorBuffer) -> BridgeStatus;

/// Release a handle. Freeing the empty token or an already freed handle is a no-op.
pub type FreeHandleFn = unsafe extern "C" fn(handle: GcHandle);

/// Dispose the shadow object behind `object` without freeing its handle.
pub type DisposeObjectFn = unsafe extern "C" fn(object: GcHandle);

pub type FindAssemblyFn = unsafe extern "C" fn(name: *const u16) -> GcHandle;

/// Load a plugin from a dynamic library. Returns the plugin's assembly handle.
pub type LoadPluginFn = unsafe extern "C" fn(
    name: *const u16,
    library_path: *const u16,
    error: *mut ErrorBuffer,
) -> GcHandle;

/// Returns false when the plugin did not become unloadable in time.
pub type UnloadPluginFn = unsafe extern "C" fn(name: *const u16, error: *mut ErrorBuffer) -> bool;

pub type IsPluginLoadedFn = unsafe extern "C" fn(name: *const u16) -> bool;

/// Run and drop the startup jobs queued for an assembly. Returns the failure count.
pub type RunStartupJobsFn = unsafe extern "C" fn(assembly_name: *const u16) -> u32;

/// Bridge entry point resolved by name from the managed library.
pub type InitFn = unsafe extern "C" fn(
    api: *const NativeApi,
    slots: *const ExportSlot,
    slot_count: u32,
    error: *mut ErrorBuffer,
) -> BridgeStatus;
