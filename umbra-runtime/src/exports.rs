// C ABI entry points handed to the native host through named export slots.
//
// `init` validates every slot name before writing any of them, so a host
// built against a different slot set fails registration without half-filled
// tables. Each entry point runs inside `guarded`/`ffi_boundary`.

use std::ffi::c_void;
use std::panic::AssertUnwindSafe;

use log::LevelFilter;
use umbra_ffi::exports::*;
use umbra_ffi::{BridgeStatus, ErrorBuffer, ExportSlot, GcHandle, NativeApi, NativeObjectPtr};

use crate::error::{UmbraError, UmbraResult};
use crate::ffi_guard::{ffi_boundary, guarded, guarded_status};
use crate::handles::handles;
use crate::plugins::{plugins, AssemblySource, PluginDescriptor};
use crate::wide::read_wide;
use crate::{api, construct, delegates, invoke, logging, resolver};

unsafe extern "C" fn create_object(native: NativeObjectPtr, type_handle: GcHandle, error: *mut ErrorBuffer) -> GcHandle {
    guarded(error, GcHandle::NULL, AssertUnwindSafe(|| construct::create_object(native, type_handle)))
}

unsafe extern "C" fn lookup_type(assembly: GcHandle, full_name: *const u16, error: *mut ErrorBuffer) -> GcHandle {
    guarded(
        error,
        GcHandle::NULL,
        AssertUnwindSafe(|| {
            let assembly = resolver::resolve_assembly(assembly)?;
            let full_name = unsafe { read_wide(full_name) }?;
            resolver::lookup_type(&assembly, &full_name)
        }),
    )
}

unsafe extern "C" fn lookup_method(type_handle: GcHandle, name: *const u16, error: *mut ErrorBuffer) -> GcHandle {
    guarded(
        error,
        GcHandle::NULL,
        AssertUnwindSafe(|| {
            let name = unsafe { read_wide(name) }?;
            resolver::lookup_method(type_handle, &name)
        }),
    )
}

unsafe extern "C" fn invoke_method(object: GcHandle, method: GcHandle, error: *mut ErrorBuffer) -> BridgeStatus {
    guarded_status(error, AssertUnwindSafe(|| invoke::invoke_method(object, method)))
}

unsafe extern "C" fn invoke_method_buffered(
    object: GcHandle,
    method: GcHandle,
    args: *mut u8,
    ret: *mut u8,
    error: *mut ErrorBuffer,
) -> BridgeStatus {
    guarded_status(
        error,
        AssertUnwindSafe(|| unsafe { invoke::invoke_method_buffered(object, method, args, ret) }),
    )
}

unsafe extern "C" fn invoke_delegate(delegate: GcHandle, error: *mut ErrorBuffer) -> BridgeStatus {
    guarded_status(error, AssertUnwindSafe(|| delegates::invoke_delegate(delegate)))
}

unsafe extern "C" fn free_handle(handle: GcHandle) {
    ffi_boundary((), AssertUnwindSafe(|| handles().free(handle, None)))
}

unsafe extern "C" fn dispose_object(object: GcHandle) {
    ffi_boundary((), AssertUnwindSafe(|| construct::dispose_object(object)))
}

unsafe extern "C" fn find_assembly(name: *const u16) -> GcHandle {
    guarded(
        std::ptr::null_mut(),
        GcHandle::NULL,
        AssertUnwindSafe(|| {
            let name = unsafe { read_wide(name) }?;
            match plugins().find_assembly(&name) {
                Some(assembly) => resolver::assembly_handle(&assembly),
                None => Ok(GcHandle::NULL),
            }
        }),
    )
}

unsafe extern "C" fn load_plugin(name: *const u16, library_path: *const u16, error: *mut ErrorBuffer) -> GcHandle {
    guarded(
        error,
        GcHandle::NULL,
        AssertUnwindSafe(|| {
            let name = unsafe { read_wide(name) }?;
            let path = unsafe { read_wide(library_path) }?;
            let descriptor = PluginDescriptor::new(name).with_assembly(AssemblySource::Library { path: path.into() });
            let assemblies = plugins().load_plugin(&descriptor)?;
            match assemblies.first() {
                Some(assembly) => resolver::assembly_handle(assembly),
                None => Ok(GcHandle::NULL),
            }
        }),
    )
}

unsafe extern "C" fn unload_plugin(name: *const u16, error: *mut ErrorBuffer) -> bool {
    guarded(
        error,
        false,
        AssertUnwindSafe(|| {
            let name = unsafe { read_wide(name) }?;
            plugins().unload_plugin(&name).map(|()| true)
        }),
    )
}

unsafe extern "C" fn is_plugin_loaded(name: *const u16) -> bool {
    guarded(
        std::ptr::null_mut(),
        false,
        AssertUnwindSafe(|| Ok(plugins().is_plugin_loaded(&unsafe { read_wide(name) }?))),
    )
}

unsafe extern "C" fn run_startup_jobs(assembly_name: *const u16) -> u32 {
    guarded(
        std::ptr::null_mut(),
        0,
        AssertUnwindSafe(|| {
            let name = unsafe { read_wide(assembly_name) }?;
            Ok(crate::jobs::startup_jobs().run_for_assembly(&name).ran as u32)
        }),
    )
}

/// Address for the export slot named `name`.
fn export_address(name: &str) -> Option<*const c_void> {
    let address = match name {
        SLOT_CREATE_OBJECT => create_object as CreateObjectFn as *const c_void,
        SLOT_LOOKUP_TYPE => lookup_type as LookupTypeFn as *const c_void,
        SLOT_LOOKUP_METHOD => lookup_method as LookupMethodFn as *const c_void,
        SLOT_INVOKE_METHOD => invoke_method as InvokeMethodFn as *const c_void,
        SLOT_INVOKE_METHOD_BUFFERED => invoke_method_buffered as InvokeMethodBufferedFn as *const c_void,
        SLOT_INVOKE_DELEGATE => invoke_delegate as InvokeDelegateFn as *const c_void,
        SLOT_FREE_HANDLE => free_handle as FreeHandleFn as *const c_void,
        SLOT_DISPOSE_OBJECT => dispose_object as DisposeObjectFn as *const c_void,
        SLOT_FIND_ASSEMBLY => find_assembly as FindAssemblyFn as *const c_void,
        SLOT_LOAD_PLUGIN => load_plugin as LoadPluginFn as *const c_void,
        SLOT_UNLOAD_PLUGIN => unload_plugin as UnloadPluginFn as *const c_void,
        SLOT_IS_PLUGIN_LOADED => is_plugin_loaded as IsPluginLoadedFn as *const c_void,
        SLOT_RUN_STARTUP_JOBS => run_startup_jobs as RunStartupJobsFn as *const c_void,
        _ => return None,
    };
    Some(address)
}

/// Fill every slot with its entry point. All names are checked first; an
/// unknown name fails the whole registration.
///
/// # Safety
/// `slots` must point at `count` slots whose names are null-terminated UTF-16
/// and whose targets are writable.
pub unsafe fn fill_export_slots(slots: *const ExportSlot, count: u32) -> UmbraResult<usize> {
    if count == 0 {
        return Ok(0);
    }
    if slots.is_null() {
        return Err(UmbraError::NullArgument("export slots"));
    }
    let slots = unsafe { std::slice::from_raw_parts(slots, count as usize) };
    let mut resolved = Vec::with_capacity(slots.len());
    for slot in slots {
        let name = unsafe { read_wide(slot.name) }?;
        let address = export_address(&name).ok_or_else(|| UmbraError::UnknownExportSlot(name.clone()))?;
        if slot.target.is_null() {
            return Err(UmbraError::NullArgument("export slot target"));
        }
        resolved.push((slot.target, address));
    }
    for (target, address) in &resolved {
        unsafe { **target = *address };
    }
    log::debug!("filled {} export slots", resolved.len());
    Ok(resolved.len())
}

/// Body of `umbra_init`: install the native API, start logging, fill the
/// export slots and load the assemblies linked into the host.
///
/// # Safety
/// See [`fill_export_slots`]; `api` must outlive the process.
pub unsafe fn init(api: *const NativeApi, slots: *const ExportSlot, slot_count: u32, error: *mut ErrorBuffer) -> BridgeStatus {
    guarded_status(
        error,
        AssertUnwindSafe(|| {
            api::init_api(api)?;
            logging::init_logging(LevelFilter::Info);
            unsafe { fill_export_slots(slots, slot_count) }?;
            let linked = plugins().load_linked_assemblies()?;
            log::info!("umbra runtime initialized, {linked} linked assemblies");
            Ok(())
        }),
    )
}

/// Body of `umbra_shutdown`.
pub fn shutdown() {
    ffi_boundary(
        (),
        AssertUnwindSafe(|| {
            plugins().shutdown_all();
            let reclaimed = handles().sweep();
            log::info!("umbra runtime shut down, {reclaimed} handles reclaimed");
        }),
    )
}
