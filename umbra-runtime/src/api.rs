// Global native API table. Installed once by `umbra_init`, read-only afterwards.

use std::sync::OnceLock;

use umbra_ffi::{
    NativeApi, NativeContainerApi, NativeMemoryApi, NativeObjectApi, NativeReflectionApi,
    NativeStringApi, NATIVE_API_VERSION,
};

use crate::error::{UmbraError, UmbraResult};

/// Wrapper so a raw pointer can live inside OnceLock (which requires Send+Sync).
/// SAFETY: the native host creates the table before `umbra_init` and keeps it
/// alive for the whole process. Access is read-only after init.
struct ApiRef(*const NativeApi);
unsafe impl Send for ApiRef {}
unsafe impl Sync for ApiRef {}

static API: OnceLock<ApiRef> = OnceLock::new();

/// Store the API table pointer. Rejects null tables, version mismatches and
/// a second installation.
pub fn init_api(table: *const NativeApi) -> UmbraResult<()> {
    if table.is_null() {
        return Err(UmbraError::NullArgument("native API table"));
    }
    // SAFETY: non-null, and the host guarantees it points at a live table.
    let found = unsafe { (*table).version };
    if found != NATIVE_API_VERSION {
        return Err(UmbraError::ApiVersion {
            expected: NATIVE_API_VERSION,
            found,
        });
    }
    API.set(ApiRef(table))
        .map_err(|_| UmbraError::AlreadyInitialized)
}

/// Access the global API table.
///
/// # Panics
/// Panics if called before [`init_api`]. Generated code only runs after the
/// host has initialised the bridge.
#[inline(always)]
pub fn api() -> &'static NativeApi {
    match try_api() {
        Ok(api) => api,
        Err(_) => panic!("umbra native API not initialized"),
    }
}

/// Fallible access to the global API table.
#[inline]
pub fn try_api() -> UmbraResult<&'static NativeApi> {
    // SAFETY: the pointer was validated non-null in init_api and outlives the bridge.
    API.get()
        .map(|r| unsafe { &*r.0 })
        .ok_or(UmbraError::ApiNotInitialized)
}

#[inline]
pub fn is_api_initialized() -> bool {
    API.get().is_some()
}

// Sub-table accessors. Every sub-table pointer is non-null once the table is installed.

#[inline]
pub(crate) fn reflection() -> &'static NativeReflectionApi {
    unsafe { &*api().reflection }
}

#[inline]
pub(crate) fn object() -> &'static NativeObjectApi {
    unsafe { &*api().object }
}

#[inline]
pub(crate) fn memory() -> &'static NativeMemoryApi {
    unsafe { &*api().memory }
}

#[inline]
pub(crate) fn strings() -> &'static NativeStringApi {
    unsafe { &*api().string }
}

#[inline]
pub(crate) fn containers() -> &'static NativeContainerApi {
    unsafe { &*api().container }
}
